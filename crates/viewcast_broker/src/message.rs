//! Message definitions for the broker
//!
//! `Message` is what a publisher hands to an exchange; the broker stores one
//! copy of it per queue the exchange routes to. `Delivery` is a queued
//! message handed to one consumer, stamped with the delivery tag the
//! consumer must use to settle it.
//!
//! Notes on fields:
//! - `payload`: the body as published; the broker never looks inside
//! - `timestamp`: milliseconds since UNIX epoch; set by the broker on publish
//! - `message_id`: opaque id shared by every queued copy of one publish
//! - `delivery_count`: how many times this copy has been handed out

use serde::{Deserialize, Serialize};

/// Per-session, monotonically increasing identifier of a delivery.
pub type DeliveryTag = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub exchange: String,
    pub routing_key: String,
    pub payload: String,
    pub timestamp: i64,
    pub message_id: String,
    pub delivery_count: u32,
}

impl Message {
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_tag: DeliveryTag,
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub payload: String,
    pub message_id: String,
    pub timestamp: i64,
}

impl Delivery {
    pub(crate) fn new(tag: DeliveryTag, consumer_tag: &str, message: &Message) -> Self {
        Self {
            delivery_tag: tag,
            consumer_tag: consumer_tag.to_string(),
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            redelivered: message.redelivered(),
            payload: message.payload.clone(),
            message_id: message.message_id.clone(),
            timestamp: message.timestamp,
        }
    }
}
