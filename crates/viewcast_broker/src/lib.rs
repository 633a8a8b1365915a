//! viewcast_broker
//!
//! In-memory, AMQP-flavoured message broker engine: exchanges, queues,
//! bindings, consumers and per-session delivery tracking with explicit
//! acknowledgements.
//!
//! Public types:
//! - `Broker`: the engine; declare topology, publish, consume, ack/nack.
//! - `Session`: the broker side of a client connection.
//! - `Delivery`: a message handed to a consumer, identified by its delivery tag.
//!
//! The engine is synchronous and meant to sit behind a lock owned by the
//! transport layer. Nothing is persisted: a broker restart loses every
//! exchange, queue and in-flight message.

pub mod engine;
pub mod error;
pub mod exchange;
pub mod message;
pub mod queue;
pub mod session;

pub use engine::{Broker, QueueDeclared, RedeliveryPolicy};
pub use error::BrokerError;
pub use exchange::ExchangeKind;
pub use message::{Delivery, DeliveryTag, Message};
pub use queue::QueueOptions;
pub use session::{Session, SessionId};

#[cfg(test)]
mod tests;
