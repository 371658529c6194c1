//! Counting stream wrapper for upload bodies.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::counter::TransferCounter;

/// Body stream slice size when re-sending a buffered chunk
const SLICE_SIZE: usize = 64 * 1024;

/// Stream wrapper that adds every yielded chunk to a [`TransferCounter`]
pub struct ProgressStream<S> {
    inner: S,
    counter: TransferCounter,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, counter: TransferCounter) -> Self {
        Self { inner, counter }
    }
}

impl ProgressStream<futures_util::stream::Iter<std::vec::IntoIter<Result<Bytes, std::io::Error>>>> {
    /// Stream an in-memory buffer in fixed slices. Slicing `Bytes` is zero-copy.
    pub fn from_bytes(data: Bytes, counter: TransferCounter) -> Self {
        let mut slices = Vec::with_capacity(data.len() / SLICE_SIZE + 1);
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + SLICE_SIZE).min(data.len());
            slices.push(Ok(data.slice(offset..end)));
            offset = end;
        }
        Self::new(futures_util::stream::iter(slices), counter)
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = Pin::new(&mut self.inner);

        match inner.poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                self.counter.add(bytes.len() as u64);
                Poll::Ready(Some(Ok(bytes)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::io::ReaderStream;

    #[tokio::test]
    async fn test_counts_reader_stream() {
        let data = vec![1u8; 200_000];
        let counter = TransferCounter::new(data.len() as u64);
        let mut stream = ProgressStream::new(ReaderStream::new(&data[..]), counter.clone());

        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
            assert_eq!(counter.transferred(), total as u64);
        }
        assert_eq!(total, data.len());
        assert!(counter.is_complete());
    }

    #[tokio::test]
    async fn test_from_bytes_slices_without_loss() {
        let data = Bytes::from(vec![7u8; SLICE_SIZE * 2 + 10]);
        let counter = TransferCounter::new(data.len() as u64);
        let stream = ProgressStream::from_bytes(data.clone(), counter.clone());

        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 10);
        assert_eq!(chunks.concat(), data.to_vec());
        assert_eq!(counter.transferred(), data.len() as u64);
    }
}
