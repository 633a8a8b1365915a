//! viewcast_streaming
//!
//! `GET /video?id=<id>` streams a known video file and announces the view on
//! the "viewed" exchange.

pub mod catalog;
pub mod server;

pub use catalog::VideoCatalog;
pub use server::{StreamingError, bind, routes};
