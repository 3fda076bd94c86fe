use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, future, stream, stream::BoxStream};

/// The bytes of one snapshot, delivered in chunks. An `Err` item aborts the
/// upload and fails the cycle with `CaptureFailed`.
pub type SnapshotStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Produces the data of one snapshot. Called once per backup cycle, after the
/// new key is known and before anything is uploaded. The stream is consumed
/// while it is uploaded, so a source never needs to hold a whole snapshot in
/// memory.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn capture(&self) -> anyhow::Result<SnapshotStream>;
}

/// A stream yielding `data` as a single chunk.
pub fn single_chunk(data: Bytes) -> SnapshotStream {
    stream::once(future::ready(Ok(data))).boxed()
}

#[async_trait]
impl SnapshotSource for Bytes {
    async fn capture(&self) -> anyhow::Result<SnapshotStream> {
        Ok(single_chunk(self.clone()))
    }
}

/// Adapts an async closure returning the whole snapshot into a
/// [`SnapshotSource`]. Meant for small snapshots and tests.
pub struct FnSource<F>(pub F);

#[async_trait]
impl<F, Fut> SnapshotSource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send,
{
    async fn capture(&self) -> anyhow::Result<SnapshotStream> {
        Ok(single_chunk((self.0)().await?))
    }
}
