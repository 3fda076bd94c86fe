pub mod agent;
pub mod constant;
pub mod error;
pub mod retention;
pub mod snapshot;
pub mod source;
pub mod store;

pub use agent::{BackupAgent, BackupSummary, PruneReport, backup};
pub use error::{BackupError, DeleteFailure, StoreError};
pub use retention::RetentionPolicy;
pub use snapshot::{Snapshot, SnapshotName};
pub use source::{FnSource, SnapshotSource, SnapshotStream};
pub use store::{
    BlobDownload, BlobInfo, BlobStore, BlobStream, DiskStoreConfig, ObjectBlobStore, S3Config,
    StoreConfig,
};
