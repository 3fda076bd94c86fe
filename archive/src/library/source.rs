use std::path::PathBuf;

use async_trait::async_trait;
use blobsnap_library::{SnapshotSource, SnapshotStream};

use crate::library::{archive::archive_dir, progress::ProgressSender};

/// Snapshots a directory as a tar archive.
pub struct DirectorySource {
    pub path: PathBuf,
    pub compress: bool,
    pub sender: Option<ProgressSender>,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>, compress: bool) -> Self {
        DirectorySource {
            path: path.into(),
            compress,
            sender: None,
        }
    }

    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.sender = Some(sender);
        self
    }
}

#[async_trait]
impl SnapshotSource for DirectorySource {
    async fn capture(&self) -> anyhow::Result<SnapshotStream> {
        archive_dir(&self.path, self.compress, self.sender.clone()).await
    }
}
