use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc::UnboundedSender,
};

/// Receives the number of bytes moved by each read or write.
pub type ProgressSender = UnboundedSender<u64>;

/// Counts bytes passing through an async reader or writer.
pub struct ProgressReporterIo<T> {
    inner: T,
    sender: Option<ProgressSender>,
}

impl<T> ProgressReporterIo<T> {
    pub fn new(inner: T, sender: Option<ProgressSender>) -> Self {
        ProgressReporterIo { inner, sender }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn report(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }

        if let Some(sender) = &self.sender {
            sender.send(bytes as u64).ok();
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressReporterIo<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);

        if let Poll::Ready(Ok(bytes_written)) = poll {
            self.report(bytes_written);
        }

        poll
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReporterIo<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let initial_len = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = poll {
            self.report(buf.filled().len() - initial_len);
        }

        poll
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        sync::mpsc,
    };

    use super::*;

    #[tokio::test]
    async fn test_counts_written_and_read_bytes() -> anyhow::Result<()> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let mut writer = ProgressReporterIo::new(Vec::new(), Some(sender.clone()));
        writer.write_all(b"hello world").await?;
        let written = writer.into_inner();

        let mut reader = ProgressReporterIo::new(written.as_slice(), Some(sender));
        let mut out = String::new();
        reader.read_to_string(&mut out).await?;
        drop(reader);

        let mut total = 0;
        while let Some(bytes) = receiver.recv().await {
            total += bytes;
        }

        assert_eq!(out, "hello world");
        assert_eq!(total, 22);

        Ok(())
    }
}
