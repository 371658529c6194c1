//! Byte counters shared between a transfer and its progress reporter.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Bytes moved so far against a known total.
///
/// Clones share the same count. Only the wrapped stream increments it, so
/// `transferred` never decreases; staying within `length` is up to the caller.
#[derive(Debug, Clone)]
pub struct TransferCounter {
    transferred: Arc<AtomicU64>,
    length: u64,
}

impl TransferCounter {
    pub fn new(length: u64) -> Self {
        Self {
            transferred: Arc::new(AtomicU64::new(0)),
            length,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_complete(&self) -> bool {
        self.transferred() >= self.length
    }

    pub fn add(&self, n: u64) {
        self.transferred.fetch_add(n, Ordering::Relaxed);
    }
}

/// Counts bytes read through it.
pub struct CountingReader<R> {
    inner: R,
    counter: TransferCounter,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, counter: TransferCounter) -> Self {
        Self { inner, counter }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.counter.add((buf.filled().len() - before) as u64);
        Poll::Ready(Ok(()))
    }
}

/// Counts bytes accepted by the wrapped writer.
pub struct CountingWriter<W> {
    inner: W,
    counter: TransferCounter,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W, counter: TransferCounter) -> Self {
        Self { inner, counter }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let n = ready!(Pin::new(&mut self.inner).poll_write(cx, buf))?;
        self.counter.add(n as u64);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
