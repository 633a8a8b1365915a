use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Maps servable video ids to files.
#[derive(Debug, Clone)]
pub struct VideoCatalog {
    videos: HashMap<String, PathBuf>,
}

impl VideoCatalog {
    /// The stock catalog: ids `1` and `2`, stored as `video1.mp4` and
    /// `video2.mp4` in `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_ids(dir, ["1", "2"])
    }

    pub fn with_ids<'a>(dir: impl AsRef<Path>, ids: impl IntoIterator<Item = &'a str>) -> Self {
        let dir = dir.as_ref();
        let videos = ids
            .into_iter()
            .map(|id| (id.to_string(), dir.join(format!("video{id}.mp4"))))
            .collect();
        Self { videos }
    }

    pub fn resolve(&self, id: &str) -> Option<&Path> {
        self.videos.get(id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}
