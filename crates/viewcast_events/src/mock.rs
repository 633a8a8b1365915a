//! In-memory stand-ins for the broker channel and the recommender.

use std::sync::{Arc, Mutex, PoisonError};

use viewcast_client::ClientError;

use crate::event::ViewedEvent;
use crate::publisher::EventSink;
use crate::recommend::{RecommendError, Recommendation, Recommender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: String,
}

/// Records every publish. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    published: Arc<Mutex<Vec<Published>>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: String,
    ) -> Result<(), ClientError> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload,
            });
        Ok(())
    }
}

/// Behaves like a channel whose connection has gone away.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedSink;

impl EventSink for ClosedSink {
    fn publish(&self, _: &str, _: &str, _: String) -> Result<(), ClientError> {
        Err(ClientError::ConnectionClosed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailingRecommender;

impl Recommender for FailingRecommender {
    fn recommend(&self, _: &ViewedEvent) -> Result<Recommendation, RecommendError> {
        Err(RecommendError::Unavailable("mock failure".to_string()))
    }
}
