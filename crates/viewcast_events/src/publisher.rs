use std::sync::Arc;

use tracing::{debug, warn};
use viewcast_client::{Channel, ClientError};

use crate::event::ViewedEvent;
use crate::topology::VIEWED_EXCHANGE;

/// Something a serialized event can be handed to without waiting.
pub trait EventSink: Send + Sync {
    fn publish(&self, exchange: &str, routing_key: &str, payload: String)
    -> Result<(), ClientError>;
}

impl EventSink for Channel {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: String,
    ) -> Result<(), ClientError> {
        self.basic_publish(exchange, routing_key, payload)
    }
}

/// Broadcasts "viewed" events. Cloning shares the underlying sink.
#[derive(Clone)]
pub struct ViewedPublisher {
    sink: Arc<dyn EventSink>,
}

impl ViewedPublisher {
    pub fn new(sink: impl EventSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Never blocks and never fails the caller: when the broker link is down
    /// the notification is logged and dropped.
    pub fn publish_viewed(&self, video_id: &str) {
        let event = ViewedEvent::for_video(video_id);
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize viewed event for video {video_id}: {e}");
                return;
            }
        };

        match self.sink.publish(VIEWED_EXCHANGE, "", payload) {
            Ok(()) => debug!(video_path = %event.video_path, "published viewed event"),
            Err(e) => warn!(video_id, "viewed event dropped: {e}"),
        }
    }
}
