//! Broker side of a client connection
//!
//! A `Session` holds the sending half of the per-connection channel the
//! transport drains into the socket, plus the delivery tag counter that
//! scopes tags to this session.

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::message::{Delivery, DeliveryTag};

pub type SessionId = String;

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub sender: UnboundedSender<Delivery>,
    last_delivery_tag: DeliveryTag,
}

impl Session {
    /// Create a new session with a sender channel. The `id` is a UUID used
    /// to identify the session across broker operations.
    pub fn new(sender: UnboundedSender<Delivery>) -> Self {
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            sender,
            last_delivery_tag: 0,
        }
    }

    /// Number of deliveries handed to this session so far.
    pub fn deliveries_issued(&self) -> DeliveryTag {
        self.last_delivery_tag
    }

    pub(crate) fn next_delivery_tag(&mut self) -> DeliveryTag {
        self.last_delivery_tag += 1;
        self.last_delivery_tag
    }
}
