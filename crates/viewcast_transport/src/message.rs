//! Wire protocol between broker and clients
//!
//! Requests that expect an answer carry a client chosen `request_id`, echoed
//! by the matching `*_ok` or `error` frame. `publish`, `cancel`, `ack` and
//! `nack` are fire-and-forget; the broker only answers them with an `error` frame
//! (without `request_id`) when they fail.

use serde::{Deserialize, Serialize};
use viewcast_broker::{BrokerError, Delivery, DeliveryTag, ExchangeKind};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ExchangeDeclare {
        request_id: u64,
        exchange: String,
        kind: ExchangeKind,
        #[serde(default)]
        durable: bool,
    },
    QueueDeclare {
        request_id: u64,
        /// Empty asks the broker to name the queue.
        #[serde(default)]
        queue: String,
        #[serde(default)]
        exclusive: bool,
        #[serde(default)]
        auto_delete: bool,
        #[serde(default)]
        durable: bool,
    },
    QueueBind {
        request_id: u64,
        queue: String,
        exchange: String,
        #[serde(default)]
        routing_key: String,
    },
    Publish {
        exchange: String,
        #[serde(default)]
        routing_key: String,
        payload: String,
    },
    Consume {
        request_id: u64,
        queue: String,
        #[serde(default)]
        consumer_tag: Option<String>,
        #[serde(default)]
        no_ack: bool,
    },
    /// Stops deliveries to a consumer of this session.
    Cancel {
        consumer_tag: String,
    },
    Ack {
        delivery_tag: DeliveryTag,
        #[serde(default)]
        multiple: bool,
    },
    Nack {
        delivery_tag: DeliveryTag,
        #[serde(default)]
        requeue: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ExchangeDeclareOk {
        request_id: u64,
    },
    QueueDeclareOk {
        request_id: u64,
        queue: String,
        message_count: usize,
        consumer_count: usize,
    },
    QueueBindOk {
        request_id: u64,
    },
    ConsumeOk {
        request_id: u64,
        consumer_tag: String,
    },
    Deliver(Delivery),
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(request_id: Option<u64>, err: &BrokerError) -> Self {
        ServerMessage::Error {
            request_id,
            code: err.reply_code(),
            message: err.to_string(),
        }
    }

    /// The request this frame answers, if it answers one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMessage::ExchangeDeclareOk { request_id }
            | ServerMessage::QueueDeclareOk { request_id, .. }
            | ServerMessage::QueueBindOk { request_id }
            | ServerMessage::ConsumeOk { request_id, .. } => Some(*request_id),
            ServerMessage::Error { request_id, .. } => *request_id,
            ServerMessage::Deliver(_) => None,
        }
    }
}
