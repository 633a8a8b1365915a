use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;
use viewcast_transport::{ClientMessage, ExchangeKind, ServerMessage};

use crate::connection::Shared;
use crate::consumer::Consumer;
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeDeclareOptions {
    pub durable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDeclareOptions {
    pub exclusive: bool,
    pub auto_delete: bool,
    pub durable: bool,
}

/// What the broker reported after declaring a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: usize,
    pub consumer_count: usize,
}

/// Handle for issuing broker operations. Clones share one connection and are
/// safe to use from any number of tasks at once.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), ClientError> {
        let exchange = exchange.to_string();
        let reply = self
            .shared
            .call(move |request_id| ClientMessage::ExchangeDeclare {
                request_id,
                exchange,
                kind,
                durable: options.durable,
            })
            .await?;

        match reply {
            ServerMessage::ExchangeDeclareOk { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Declares a queue. An empty name lets the broker pick one; the chosen
    /// name is in the returned `QueueInfo`.
    pub async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<QueueInfo, ClientError> {
        let queue = queue.to_string();
        let reply = self
            .shared
            .call(move |request_id| ClientMessage::QueueDeclare {
                request_id,
                queue,
                exclusive: options.exclusive,
                auto_delete: options.auto_delete,
                durable: options.durable,
            })
            .await?;

        match reply {
            ServerMessage::QueueDeclareOk {
                queue,
                message_count,
                consumer_count,
                ..
            } => Ok(QueueInfo {
                name: queue,
                message_count,
                consumer_count,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ClientError> {
        let (queue, exchange, routing_key) =
            (queue.to_string(), exchange.to_string(), routing_key.to_string());
        let reply = self
            .shared
            .call(move |request_id| ClientMessage::QueueBind {
                request_id,
                queue,
                exchange,
                routing_key,
            })
            .await?;

        match reply {
            ServerMessage::QueueBindOk { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Enqueues a publish frame and returns immediately. There is no broker
    /// confirmation; an error only means the connection is already gone.
    pub fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.shared.send(ClientMessage::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.into(),
        })
    }

    /// Starts consuming `queue`. With `no_ack` the broker considers every
    /// delivery settled as soon as it is sent.
    pub async fn basic_consume(&self, queue: &str, no_ack: bool) -> Result<Consumer, ClientError> {
        let tag = format!("ctag-{}", Uuid::new_v4().simple());
        let (tx, rx) = mpsc::unbounded_channel();

        // registered first: deliveries may follow consume_ok immediately
        self.shared.register_consumer(&tag, tx);

        let queue = queue.to_string();
        let requested = tag.clone();
        let reply = self
            .shared
            .call(move |request_id| ClientMessage::Consume {
                request_id,
                queue,
                consumer_tag: Some(requested),
                no_ack,
            })
            .await;

        match reply {
            Ok(ServerMessage::ConsumeOk { .. }) => Ok(Consumer::new(tag, rx, self.shared.clone())),
            Ok(other) => {
                self.shared.forget_consumer(&tag);
                Err(unexpected(other))
            }
            Err(e) => {
                self.shared.forget_consumer(&tag);
                Err(e)
            }
        }
    }
}

fn unexpected(reply: ServerMessage) -> ClientError {
    ClientError::UnexpectedReply(format!("{reply:?}"))
}
