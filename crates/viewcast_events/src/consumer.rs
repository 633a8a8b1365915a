//! Consuming "viewed" events
//!
//! Every delivery ends in one of three outcomes:
//! - `Processed`: the recommender ran, the delivery is acked
//! - `Retry`: the recommender failed, the delivery is left unacked so the
//!   broker hands it out again
//! - `Drop`: the payload is not a viewed event, the delivery is acked and logged
//!
//! A payload without a video id is still `Processed`; acking it keeps the
//! message from cycling forever.

use tracing::{debug, info, warn};
use viewcast_client::{Acker, ClientError, Consumer};

use crate::event::ViewedEvent;
use crate::recommend::{LogRecommender, Recommendation, Recommender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Processed(Recommendation),
    Retry,
    Drop,
}

impl ProcessingOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, ProcessingOutcome::Retry)
    }
}

pub struct ViewedConsumer<R = LogRecommender> {
    recommender: R,
}

impl Default for ViewedConsumer<LogRecommender> {
    fn default() -> Self {
        Self::new(LogRecommender)
    }
}

impl<R: Recommender> ViewedConsumer<R> {
    pub fn new(recommender: R) -> Self {
        Self { recommender }
    }

    pub fn process(&self, raw: &[u8]) -> ProcessingOutcome {
        let event = match ViewedEvent::from_payload(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "Dropping malformed viewed message: {e} | {}",
                    String::from_utf8_lossy(raw).chars().take(100).collect::<String>()
                );
                return ProcessingOutcome::Drop;
            }
        };

        info!(video_path = %event.video_path, "received a viewed message");

        match self.recommender.recommend(&event) {
            Ok(recommendation) => ProcessingOutcome::Processed(recommendation),
            Err(e) => {
                warn!(video_path = %event.video_path, "leaving viewed message for redelivery: {e}");
                ProcessingOutcome::Retry
            }
        }
    }

    /// Processes deliveries until the stream ends. Returns early only when
    /// the connection is gone, since nothing can be acked after that.
    pub async fn run(&self, mut consumer: Consumer) -> Result<(), ClientError> {
        info!(consumer_tag = consumer.tag(), "consuming viewed messages");

        while let Some(inbound) = consumer.next().await {
            let outcome = self.process(inbound.payload());
            if let Err(e) = settle(&outcome, &inbound.acker) {
                if e.is_connection_lost() {
                    return Err(e);
                }
                warn!(delivery_tag = inbound.acker.delivery_tag(), "Failed to acknowledge: {e}");
            }
        }

        info!("viewed message stream ended");
        Ok(())
    }
}

/// Applies the outcome to the broker through the delivery's own token.
pub fn settle(outcome: &ProcessingOutcome, acker: &Acker) -> Result<(), ClientError> {
    if outcome.should_ack() {
        debug!(delivery_tag = acker.delivery_tag(), "acknowledging message was handled");
        acker.ack()
    } else {
        Ok(())
    }
}
