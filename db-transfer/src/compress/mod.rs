//! Gzip decompression on the write path.
//!
//! [`DecompressWriter`] accepts compressed bytes and hands them to a background
//! task through an in-memory pipe. The task decodes every gzip member it sees
//! and writes the result into the real destination.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_compression::tokio::bufread::GzipDecoder;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tracing::debug;

/// In-flight compressed bytes between the writer and the decoder task
const PIPE_CAPACITY: usize = 256 * 1024;

pub struct DecompressWriter {
    pipe: Option<DuplexStream>,
    task: Option<JoinHandle<io::Result<u64>>>,
}

impl DecompressWriter {
    /// Start the decoder task writing into `dst`. Must run inside a tokio runtime.
    pub fn new<W>(dst: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = tokio::io::duplex(PIPE_CAPACITY);
        let task = tokio::spawn(async move {
            let mut dst = dst;
            let mut decoder = GzipDecoder::new(BufReader::new(rx));
            decoder.multiple_members(true);
            let written = tokio::io::copy(&mut decoder, &mut dst).await?;
            dst.shutdown().await?;
            debug!("Decompressed {} bytes", written);
            Ok(written)
        });
        Self {
            pipe: Some(tx),
            task: Some(task),
        }
    }

    /// Wait for the decoder task and turn its outcome into an io result.
    fn poll_task(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let joined = ready!(Pin::new(task).poll(cx));
        self.task = None;
        match joined {
            Ok(Ok(_)) => Poll::Ready(Ok(())),
            Ok(Err(e)) => Poll::Ready(Err(e)),
            Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
        }
    }

    /// The pipe broke under us; the decoder's own error is the interesting one.
    fn poll_broken_pipe(&mut self, cx: &mut Context<'_>, err: io::Error) -> Poll<io::Result<usize>> {
        self.pipe = None;
        match ready!(self.poll_task(cx)) {
            Err(e) => Poll::Ready(Err(e)),
            Ok(()) => Poll::Ready(Err(err)),
        }
    }
}

impl AsyncWrite for DecompressWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(pipe) = this.pipe.as_mut() else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "decompression pipeline already closed",
            )));
        };
        match ready!(Pin::new(pipe).poll_write(cx, buf)) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) => this.poll_broken_pipe(cx, e),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    /// Close the pipe, then wait for the decoder to drain and shut the destination.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(pipe) = this.pipe.as_mut() {
            ready!(Pin::new(pipe).poll_shutdown(cx))?;
            this.pipe = None;
        }
        this.poll_task(cx)
    }
}

impl Drop for DecompressWriter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
