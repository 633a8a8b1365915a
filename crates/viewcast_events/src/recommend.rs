use thiserror::Error;
use tracing::info;

use crate::event::ViewedEvent;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("recommendation backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recommendation {
    /// Recommend the video with this id.
    Video(String),
    Nothing,
}

pub trait Recommender: Send + Sync {
    fn recommend(&self, event: &ViewedEvent) -> Result<Recommendation, RecommendError>;
}

/// Recommends the video that was just watched and logs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecommender;

impl Recommender for LogRecommender {
    fn recommend(&self, event: &ViewedEvent) -> Result<Recommendation, RecommendError> {
        match event.video_id() {
            Some(id) => {
                info!("recommendation video {id}");
                Ok(Recommendation::Video(id.to_string()))
            }
            None => {
                info!(video_path = %event.video_path, "no recommendation available");
                Ok(Recommendation::Nothing)
            }
        }
    }
}
