use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use itertools::Itertools;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    constant::{DEFAULT_PREFIX, DEFAULT_PRUNE_CONCURRENCY, MAX_KEY_ATTEMPTS, STAGING_SUFFIX},
    error::{BackupError, DeleteFailure, StoreError},
    retention::RetentionPolicy,
    snapshot::{Snapshot, SnapshotName, validate_prefix},
    source::{SnapshotSource, SnapshotStream},
    store::{BlobDownload, BlobStore},
};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Outcome of a successful backup cycle.
///
/// A cycle whose upload succeeded is reported as a success even when some
/// old snapshots could not be deleted, so check [`BackupSummary::failures`].
#[derive(Debug)]
pub struct BackupSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub pruned: Vec<String>,
    pub failures: Vec<DeleteFailure>,
}

impl BackupSummary {
    pub fn pruned_count(&self) -> usize {
        self.pruned.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub pruned: Vec<String>,
    pub failures: Vec<DeleteFailure>,
}

/// Uploads snapshots into a [`BlobStore`] and prunes the oldest ones beyond
/// the retention policy.
///
/// The agent does not serialize cycles. Two cycles running against the same
/// store and prefix may briefly leave more than the retained number of
/// snapshots; callers that need a hard bound must run one cycle at a time.
pub struct BackupAgent {
    store: Arc<dyn BlobStore>,
    policy: RetentionPolicy,
    prefix: String,
    prune_concurrency: usize,
    clock: Clock,
    cancel: CancellationToken,
}

impl BackupAgent {
    pub fn new(store: Arc<dyn BlobStore>, policy: RetentionPolicy) -> Self {
        BackupAgent {
            store,
            policy,
            prefix: DEFAULT_PREFIX.to_string(),
            prune_concurrency: DEFAULT_PRUNE_CONCURRENCY,
            clock: Arc::new(Utc::now),
            cancel: CancellationToken::new(),
        }
    }

    /// Fails with `InvalidArgument` for prefixes a store might list in escaped
    /// form, see [`validate_prefix`].
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Result<Self, BackupError> {
        self.prefix = validate_prefix(prefix.as_ref())?.to_string();
        Ok(self)
    }

    pub fn with_prune_concurrency(mut self, prune_concurrency: usize) -> Self {
        self.prune_concurrency = prune_concurrency.max(1);
        self
    }

    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Runs `fut` unless the cycle is cancelled first.
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T, BackupError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Accepts either a full key or a bare snapshot name. Anything that is
    /// not a snapshot under this agent's prefix is `NotFound`.
    pub fn resolve_key(&self, key_or_name: &str) -> Result<String, BackupError> {
        let name = SnapshotName::parse(key_or_name)
            .or_else(|| SnapshotName::from_key(key_or_name, &self.prefix))
            .ok_or_else(|| BackupError::NotFound(key_or_name.to_string()))?;

        Ok(name.to_key(&self.prefix))
    }

    /// All snapshots under the prefix, oldest first.
    pub async fn snapshots(&self) -> Result<Vec<Snapshot>, BackupError> {
        let blobs = self
            .guard(self.store.list(&self.prefix))
            .await?
            .map_err(BackupError::StoreUnavailable)?;

        Ok(blobs
            .into_iter()
            .filter_map(|blob| Snapshot::from_blob(blob, &self.prefix))
            .sorted_by(Snapshot::creation_order)
            .collect())
    }

    /// Picks a name strictly after every existing snapshot, even when the
    /// clock has not moved forward since the newest one.
    fn next_name(&self, newest: Option<&Snapshot>) -> SnapshotName {
        let now = SnapshotName::new((self.clock)(), 0);

        match newest {
            Some(newest) if now <= newest.name => newest.name.successor(),
            _ => now,
        }
    }

    pub async fn run(&self, source: &dyn SnapshotSource) -> Result<BackupSummary, BackupError> {
        let existing = self.snapshots().await?;
        let name = self.next_name(existing.last());

        debug!(
            prefix = %self.prefix,
            existing = existing.len(),
            "starting backup cycle"
        );

        let data = self
            .guard(source.capture())
            .await?
            .map_err(BackupError::CaptureFailed)?;

        let staging_key = format!("{}{}", name.to_key(&self.prefix), STAGING_SUFFIX);
        let uploaded = self.upload(&staging_key, name, data).await;

        if let Err(error) = self.store.delete(&staging_key).await {
            warn!(key = %staging_key, %error, "failed to remove staged snapshot");
        }

        let (key, name, size_bytes) = uploaded?;

        info!(key = %key, size_bytes, "uploaded snapshot");

        let report = self.prune().await?;

        Ok(BackupSummary {
            key,
            created_at: name.timestamp,
            size_bytes,
            pruned: report.pruned,
            failures: report.failures,
        })
    }

    /// Streams the snapshot to `staging_key`, then publishes it under the
    /// first free name starting at `name`.
    async fn upload(
        &self,
        staging_key: &str,
        mut name: SnapshotName,
        data: SnapshotStream,
    ) -> Result<(String, SnapshotName, u64), BackupError> {
        let size_bytes = match self.guard(self.store.stage(staging_key, data)).await? {
            Ok(size_bytes) => size_bytes,
            Err(StoreError::Source(err)) => return Err(BackupError::CaptureFailed(err)),
            Err(source) => {
                return Err(BackupError::UploadFailed {
                    key: name.to_key(&self.prefix),
                    source,
                });
            }
        };

        let mut attempts = 0;

        loop {
            attempts += 1;

            let key = name.to_key(&self.prefix);

            match self.guard(self.store.commit(staging_key, &key)).await? {
                Ok(()) => return Ok((key, name, size_bytes)),
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(key = %key, attempts, "snapshot key already taken");
                }
                Err(source) => return Err(BackupError::UploadFailed { key, source }),
            }

            if attempts >= MAX_KEY_ATTEMPTS {
                return Err(BackupError::KeyCollision { attempts });
            }

            name = name.successor();
        }
    }

    /// Blocking entry point for hosts without an async runtime. Called from
    /// inside a runtime it fails with `InvalidArgument` instead of blocking
    /// that runtime's thread.
    pub fn run_blocking(
        &self,
        source: &dyn SnapshotSource,
    ) -> Result<BackupSummary, BackupError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BackupError::InvalidArgument(
                "run_blocking cannot be called from within an async runtime, await run instead"
                    .to_string(),
            ));
        }

        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(BackupError::Runtime)?
            .block_on(self.run(source))
    }

    /// Deletes the oldest snapshots beyond the retention policy.
    ///
    /// Deletions run concurrently and independently. A failed deletion is
    /// recorded in the report and does not stop the others.
    pub async fn prune(&self) -> Result<PruneReport, BackupError> {
        let (expired, kept) = self.policy.partition(self.snapshots().await?);

        if expired.is_empty() {
            debug!(kept = kept.len(), "nothing to prune");
            return Ok(PruneReport::default());
        }

        info!(
            expired = expired.len(),
            kept = kept.len(),
            "pruning snapshots"
        );

        let results = stream::iter(expired)
            .map(|snapshot| async move {
                let result = self.guard(self.store.delete(&snapshot.key)).await;
                (snapshot.key, result)
            })
            .buffered(self.prune_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut report = PruneReport::default();
        let mut cancelled = false;

        for (key, result) in results {
            match result {
                Ok(Ok(())) => {
                    debug!(key = %key, "deleted snapshot");
                    report.pruned.push(key);
                }
                Ok(Err(error)) => {
                    warn!(key = %key, %error, "failed to delete snapshot");
                    report.failures.push(DeleteFailure { key, error });
                }
                Err(_) => cancelled = true,
            }
        }

        if cancelled {
            return Err(BackupError::Cancelled);
        }

        Ok(report)
    }

    /// Opens one snapshot for reading. The data is streamed from the store.
    pub async fn restore(&self, key_or_name: &str) -> Result<BlobDownload, BackupError> {
        let key = self.resolve_key(key_or_name)?;

        match self.guard(self.store.download(&key)).await? {
            Ok(download) => Ok(download),
            Err(StoreError::NotFound(key)) => Err(BackupError::NotFound(key)),
            Err(err) => Err(BackupError::StoreUnavailable(err)),
        }
    }

    pub async fn delete(&self, key_or_name: &str) -> Result<(), BackupError> {
        let key = self.resolve_key(key_or_name)?;

        self.guard(self.store.delete(&key))
            .await?
            .map_err(|error| DeleteFailure { key, error })?;

        Ok(())
    }
}

/// Runs one backup cycle with default settings and `retention_count`
/// snapshots kept.
pub async fn backup(
    store: Arc<dyn BlobStore>,
    source: &dyn SnapshotSource,
    retention_count: usize,
) -> Result<BackupSummary, BackupError> {
    BackupAgent::new(store, RetentionPolicy::new(retention_count)?)
        .run(source)
        .await
}
