//! viewcast_transport
//!
//! Exposes a `viewcast_broker::Broker` over WebSocket. Every socket is one
//! broker session; frames are JSON objects tagged by `type`.

pub mod message;
pub mod websocket;


pub use message::{ClientMessage, ServerMessage};
pub use viewcast_broker::{Delivery, DeliveryTag, ExchangeKind};
pub use websocket::{handle_client_message, serve, start_websocket_server};
