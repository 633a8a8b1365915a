use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use viewcast_transport::{ClientMessage, Delivery, DeliveryTag};

use crate::connection::Shared;
use crate::error::ClientError;

/// Stream of deliveries for one consumer tag. Ends when the connection closes;
/// dropping it cancels the consumer.
pub struct Consumer {
    tag: String,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    shared: Arc<Shared>,
}

impl Consumer {
    pub(crate) fn new(
        tag: String,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            tag,
            deliveries,
            shared,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn next(&mut self) -> Option<InboundDelivery> {
        let delivery = self.deliveries.recv().await?;
        let acker = Acker {
            delivery_tag: delivery.delivery_tag,
            shared: self.shared.clone(),
        };
        Some(InboundDelivery { delivery, acker })
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("tag", &self.tag).finish()
    }
}

/// Cancels the consumer on the broker. Deliveries already received and not
/// settled stay unacknowledged until the ack timeout requeues them.
impl Drop for Consumer {
    fn drop(&mut self) {
        self.shared.forget_consumer(&self.tag);
        let _ = self.shared.send(ClientMessage::Cancel {
            consumer_tag: self.tag.clone(),
        });
    }
}

/// A delivery together with the token that settles it.
#[derive(Debug)]
pub struct InboundDelivery {
    pub delivery: Delivery,
    pub acker: Acker,
}

impl InboundDelivery {
    pub fn payload(&self) -> &[u8] {
        self.delivery.payload.as_bytes()
    }
}

/// Settles exactly one delivery. Acknowledging through the token keeps the
/// delivery tag tied to the message it was issued for.
#[derive(Clone)]
pub struct Acker {
    delivery_tag: DeliveryTag,
    shared: Arc<Shared>,
}

impl Acker {
    pub fn delivery_tag(&self) -> DeliveryTag {
        self.delivery_tag
    }

    pub fn ack(&self) -> Result<(), ClientError> {
        self.shared.send(ClientMessage::Ack {
            delivery_tag: self.delivery_tag,
            multiple: false,
        })
    }

    pub fn nack(&self, requeue: bool) -> Result<(), ClientError> {
        self.shared.send(ClientMessage::Nack {
            delivery_tag: self.delivery_tag,
            requeue,
        })
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker")
            .field("delivery_tag", &self.delivery_tag)
            .finish()
    }
}
