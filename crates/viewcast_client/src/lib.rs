//! viewcast_client
//!
//! Async client for the viewcast broker. A `Connection` owns one WebSocket
//! and two background tasks (socket reader and writer). `Channel` handles are
//! cheap clones sharing that connection; every request/reply operation is
//! matched to its answer through a request id, while publishing and
//! acknowledging only enqueue a frame and never wait.

pub mod channel;
pub mod connection;
pub mod consumer;
pub mod error;

pub use channel::{Channel, ExchangeDeclareOptions, QueueDeclareOptions, QueueInfo};
pub use connection::Connection;
pub use consumer::{Acker, Consumer, InboundDelivery};
pub use error::ClientError;
pub use viewcast_transport::{Delivery, DeliveryTag, ExchangeKind};
