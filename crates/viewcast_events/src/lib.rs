//! viewcast_events
//!
//! The "viewed" notification: its payload, the fanout topology both services
//! declare at startup, the fire-and-forget publisher used by the streaming
//! service and the consumer run by the recommendations service.

pub mod consumer;
pub mod event;
pub mod mock;
pub mod publisher;
pub mod recommend;
pub mod topology;

pub use consumer::{ProcessingOutcome, ViewedConsumer};
pub use event::ViewedEvent;
pub use publisher::{EventSink, ViewedPublisher};
pub use recommend::{LogRecommender, RecommendError, Recommendation, Recommender};
pub use topology::{Topology, VIEWED_EXCHANGE, bind_private_queue, ensure_topology};
