use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    /// The data being uploaded failed to produce its next chunk.
    #[error("snapshot data stream failed")]
    Source(#[source] anyhow::Error),

    #[error(transparent)]
    Backend(#[from] object_store::Error),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no free snapshot key after {attempts} attempts")]
    KeyCollision { attempts: u32 },

    #[error("failed to capture snapshot data")]
    CaptureFailed(#[source] anyhow::Error),

    #[error("failed to upload snapshot {key}")]
    UploadFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("snapshot store unavailable")]
    StoreUnavailable(#[source] StoreError),

    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    DeleteFailed(#[from] DeleteFailure),

    #[error("backup cancelled")]
    Cancelled,

    #[error("failed to start async runtime")]
    Runtime(#[source] std::io::Error),
}

/// A snapshot that pruning could not remove. Never fatal to a cycle.
#[derive(Debug, Error)]
#[error("failed to delete snapshot {key}")]
pub struct DeleteFailure {
    pub key: String,
    #[source]
    pub error: StoreError,
}
