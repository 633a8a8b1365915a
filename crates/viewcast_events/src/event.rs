use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"viewed-(\d+)").expect("video id pattern is valid"));

/// Published once per started video stream.
///
/// Wire form is `{"videoPath":"viewed-<id>"}`. Unknown fields are ignored on
/// the way in; nothing else about the schema is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewedEvent {
    #[serde(rename = "videoPath")]
    pub video_path: String,
}

impl ViewedEvent {
    pub fn for_video(video_id: &str) -> Self {
        Self {
            video_path: format!("viewed-{video_id}"),
        }
    }

    /// The digits following `viewed-`, if the path carries any.
    pub fn video_id(&self) -> Option<&str> {
        VIDEO_ID
            .captures(&self.video_path)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}
