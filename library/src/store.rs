use std::{fmt::Debug, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use object_store::{
    ObjectStore, WriteMultipart,
    aws::{AmazonS3, AmazonS3Builder, AmazonS3ConfigKey},
    local::LocalFileSystem,
    memory::InMemory,
    path::Path,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    constant::{STAGING_SUFFIX, UPLOAD_PART_CONCURRENCY},
    error::StoreError,
    snapshot::normalize_prefix,
    source::SnapshotStream,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

pub type BlobStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// The content of a stored blob, read lazily.
pub struct BlobDownload {
    pub size: u64,
    pub stream: BlobStream,
}

impl Debug for BlobDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobDownload")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl BlobDownload {
    /// Reads the whole blob into memory.
    pub async fn bytes(self) -> Result<Bytes, StoreError> {
        let mut data = BytesMut::with_capacity(usize::try_from(self.size).unwrap_or_default());
        let mut stream = self.stream;

        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        Ok(data.freeze())
    }
}

/// The storage operations a backup cycle needs.
///
/// Implementations own transport concerns such as authentication and request
/// retries. Uploads happen in two steps: the data is streamed to a staging
/// key, then published under its final key with create-only semantics.
/// `delete` must treat a missing key as already deleted.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>, StoreError>;

    /// Streams `data` to `staging_key`, replacing anything staged there
    /// before, and returns the number of bytes written.
    async fn stage(&self, staging_key: &str, data: SnapshotStream) -> Result<u64, StoreError>;

    /// Publishes the blob staged at `staging_key` under `key`. Fails with
    /// [`StoreError::AlreadyExists`] when `key` is taken. The staged blob is
    /// left in place either way.
    async fn commit(&self, staging_key: &str, key: &str) -> Result<(), StoreError>;

    async fn download(&self, key: &str) -> Result<BlobDownload, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Stages `data` next to `key`, publishes it and removes the staged copy.
    async fn upload(&self, key: &str, data: SnapshotStream) -> Result<u64, StoreError> {
        let staging_key = format!("{key}{STAGING_SUFFIX}");

        let result = match self.stage(&staging_key, data).await {
            Ok(size) => self.commit(&staging_key, key).await.map(|()| size),
            Err(err) => Err(err),
        };
        let cleanup = self.delete(&staging_key).await;

        let size = result?;
        cleanup?;

        Ok(size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub s3: Option<S3Config>,
    pub disk: Option<DiskStoreConfig>,
}

/// A [`BlobStore`] backed by any [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectBlobStore {
    object_store: Arc<dyn ObjectStore>,
}

impl Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("object_store", &self.object_store.to_string())
            .finish()
    }
}

fn s3_storage(s3: &S3Config) -> Result<AmazonS3> {
    let mut builder = AmazonS3Builder::from_env();

    // Create-only commits need conditional copies, which S3 only offers
    // through multipart uploads.
    if builder
        .get_config_value(&AmazonS3ConfigKey::CopyIfNotExists)
        .is_none()
    {
        builder = builder.with_config(AmazonS3ConfigKey::CopyIfNotExists, "multipart");
    }

    builder
        .with_region(s3.region.as_str())
        .with_allow_http(true)
        .with_bucket_name(s3.bucket.clone())
        .build()
        .context("unable to build S3 store")
}

fn file_storage(disk: &DiskStoreConfig) -> Result<LocalFileSystem> {
    std::fs::create_dir_all(&disk.path)
        .with_context(|| format!("unable to create store directory {}", disk.path))?;

    Ok(LocalFileSystem::new_with_prefix(&disk.path)?)
}

impl ObjectBlobStore {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        ObjectBlobStore { object_store }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let object_store: Arc<dyn ObjectStore> = match (&config.s3, &config.disk) {
            (Some(s3), None) => Arc::new(s3_storage(s3)?),
            (None, Some(disk)) => Arc::new(file_storage(disk)?),
            (Some(_), Some(_)) => {
                return Err(anyhow::anyhow!(
                    "cannot specify both s3 and disk blob storage"
                ));
            }
            (None, None) => {
                return Err(anyhow::anyhow!(
                    "must specify one of s3 or disk blob storage"
                ));
            }
        };

        Ok(ObjectBlobStore::new(object_store))
    }

    pub fn disk(path: impl Into<String>) -> Result<Self> {
        Ok(ObjectBlobStore::new(Arc::new(file_storage(
            &DiskStoreConfig { path: path.into() },
        )?)))
    }

    pub fn in_memory() -> Self {
        ObjectBlobStore::new(Arc::new(InMemory::new()))
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>, StoreError> {
        let prefix = match normalize_prefix(prefix) {
            "" => None,
            prefix => Some(Path::from(prefix)),
        };

        let blobs = self
            .object_store
            .list(prefix.as_ref())
            .map_ok(|meta| BlobInfo {
                key: meta.location.to_string(),
                last_modified: meta.last_modified,
                size: meta.size,
            })
            .try_collect::<Vec<_>>()
            .await?;

        debug!(count = blobs.len(), "listed blobs");

        Ok(blobs)
    }

    async fn stage(&self, staging_key: &str, mut data: SnapshotStream) -> Result<u64, StoreError> {
        let upload = self
            .object_store
            .put_multipart(&Path::from(staging_key))
            .await?;
        let mut writer = WriteMultipart::new(upload);
        let mut size = 0;

        while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(chunk) => writer
                    .wait_for_capacity(UPLOAD_PART_CONCURRENCY)
                    .await
                    .map(|()| chunk)
                    .map_err(StoreError::from),
                Err(err) => Err(StoreError::Source(err)),
            };

            match chunk {
                Ok(chunk) => {
                    size += chunk.len() as u64;
                    writer.write(&chunk);
                }
                Err(err) => {
                    if let Err(error) = writer.abort().await {
                        warn!(key = %staging_key, %error, "failed to abort staged upload");
                    }
                    return Err(err);
                }
            }
        }

        writer.finish().await?;

        debug!(key = %staging_key, size, "staged blob");

        Ok(size)
    }

    async fn commit(&self, staging_key: &str, key: &str) -> Result<(), StoreError> {
        match self
            .object_store
            .copy_if_not_exists(&Path::from(staging_key), &Path::from(key))
            .await
        {
            Ok(()) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(StoreError::AlreadyExists(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn download(&self, key: &str) -> Result<BlobDownload, StoreError> {
        let result = match self.object_store.get(&Path::from(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(BlobDownload {
            size: result.meta.size,
            stream: result.into_stream().map_err(StoreError::from).boxed(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.object_store.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
