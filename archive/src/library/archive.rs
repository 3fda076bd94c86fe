use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_compression::{
    Level,
    tokio::{bufread::ZstdDecoder, write::ZstdEncoder},
};
use blobsnap_library::SnapshotStream;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, future, stream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_tar::{Archive, Builder};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use crate::library::progress::{ProgressReporterIo, ProgressSender};

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Bytes buffered between the archiving task and the consumer of the stream.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Streams `source_path` as a tar archive, zstd compressed when `compress` is
/// set. Progress counts uncompressed tar bytes.
///
/// The archive is produced by a background task as the stream is polled, so
/// only a bounded amount of it is held in memory. A failure while archiving
/// ends the stream with an `Err` item.
pub async fn archive_dir(
    source_path: &Path,
    compress: bool,
    sender: Option<ProgressSender>,
) -> Result<SnapshotStream> {
    if !tokio::fs::metadata(source_path)
        .await
        .with_context(|| format!("cannot read source {}", source_path.display()))?
        .is_dir()
    {
        return Err(anyhow::anyhow!(
            "source {} is not a directory",
            source_path.display()
        ));
    }

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let source = source_path.to_path_buf();

    let task = tokio::spawn(async move {
        match compress {
            true => {
                let encoder = ZstdEncoder::with_quality(writer, Level::Default);
                tar_dir(&source, encoder, sender).await?;
            }
            false => {
                tar_dir(&source, writer, sender).await?;
            }
        }

        debug!(source = %source.display(), compress, "archived directory");

        anyhow::Ok(())
    });

    // The pipe only reports end of data, so the task's outcome is appended.
    let outcome = stream::once(async move {
        match task.await {
            Ok(Ok(())) => None::<Result<Bytes>>,
            Ok(Err(err)) => Some(Err(err)),
            Err(err) => Some(Err(anyhow::Error::from(err))),
        }
    })
    .filter_map(future::ready);

    Ok(ReaderStream::new(reader)
        .map_err(anyhow::Error::from)
        .chain(outcome)
        .boxed())
}

/// Unpacks an archive produced by [`archive_dir`] into `restore_path` while
/// it is read from `data`. Compression is detected from the data itself.
pub async fn restore<S, E>(
    data: S,
    restore_path: &Path,
    sender: Option<ProgressSender>,
) -> Result<()>
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    tokio::fs::create_dir_all(restore_path).await?;

    let mut reader =
        ProgressReporterIo::new(StreamReader::new(data.map_err(std::io::Error::other)), sender);

    let mut head = Vec::with_capacity(ZSTD_MAGIC.len());
    (&mut reader)
        .take(ZSTD_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .await?;

    let is_compressed = head == ZSTD_MAGIC;
    let reader = Cursor::new(head).chain(reader);

    match is_compressed {
        true => {
            let decoder = ZstdDecoder::new(BufReader::new(reader));
            untar_dir(decoder, restore_path).await?;
        }
        false => untar_dir(reader, restore_path).await?,
    }

    debug!(
        target = %restore_path.display(),
        compressed = is_compressed,
        "restored archive"
    );

    Ok(())
}

pub async fn calculate_total_size(path: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(|| {
        let total_size = walkdir::WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter_map(|m| m.is_file().then(|| m.len()))
            .sum();

        Ok(total_size)
    })
    .await?
}

async fn tar_dir<W>(dir: &Path, writer: W, sender: Option<ProgressSender>) -> Result<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let progress_writer = ProgressReporterIo::new(writer, sender);

    let mut archive = Builder::new(progress_writer);
    archive.follow_symlinks(false);
    archive.append_dir_all(".", dir).await?;

    let mut progress_writer = archive.into_inner().await?;
    progress_writer.shutdown().await?;

    Ok(progress_writer.into_inner())
}

async fn untar_dir<R>(reader: R, restore_path: &Path) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut archive = Archive::new(reader);

    archive.unpack(restore_path).await?;

    Ok(())
}
