//! Decrypt-while-writing adapter used for exports.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::AsyncWrite;

use super::gcm::Decryptor;
use super::CipherMaterial;
use crate::utils::errors::TransferError;

/// Decrypts everything written to it into `inner`.
///
/// Shutdown authenticates the stream; the destination is only shut down once
/// the tag has been verified.
pub struct DecryptWriter<W> {
    inner: W,
    decryptor: Option<Decryptor>,
    plaintext: Vec<u8>,
    pos: usize,
}

impl<W: AsyncWrite + Unpin> DecryptWriter<W> {
    pub fn new(inner: W, material: &CipherMaterial) -> Self {
        Self {
            inner,
            decryptor: Some(Decryptor::new(material)),
            plaintext: Vec::new(),
            pos: 0,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Push buffered plaintext into the destination.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.pos < self.plaintext.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.plaintext[self.pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pos += n;
        }
        self.plaintext.clear();
        self.pos = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DecryptWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        let decryptor = match this.decryptor.as_mut() {
            Some(decryptor) => decryptor,
            None => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write after shutdown",
                )))
            }
        };
        decryptor.update(buf, &mut this.plaintext);

        // Best effort: start forwarding right away, the rest goes out on the next call
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if let Some(decryptor) = this.decryptor.take() {
            decryptor.finish().map_err(TransferError::into_io)?;
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypt_bytes, TAG_SIZE};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_writer_decrypts_in_small_writes() {
        let material = CipherMaterial::generate();
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
        let sealed = encrypt_bytes(&material, &plaintext);

        let mut writer = DecryptWriter::new(Vec::new(), &material);
        for chunk in sealed.chunks(333) {
            writer.write_all(chunk).await.unwrap();
        }
        writer.shutdown().await.unwrap();
        assert_eq!(writer.get_ref(), &plaintext);
    }

    #[tokio::test]
    async fn test_tag_never_reaches_destination() {
        let material = CipherMaterial::generate();
        let sealed = encrypt_bytes(&material, b"row");

        let mut writer = DecryptWriter::new(Vec::new(), &material);
        writer.write_all(&sealed).await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.get_ref().len(), sealed.len() - TAG_SIZE);
    }

    #[tokio::test]
    async fn test_shutdown_fails_on_tampering() {
        let material = CipherMaterial::generate();
        let mut sealed = encrypt_bytes(&material, b"CREATE TABLE t (id int);");
        sealed[0] ^= 0xff;

        let mut writer = DecryptWriter::new(Vec::new(), &material);
        writer.write_all(&sealed).await.unwrap();
        let err = writer.shutdown().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(TransferError::from_io(err), TransferError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_shutdown_fails_on_short_input() {
        let material = CipherMaterial::generate();
        let mut writer = DecryptWriter::new(Vec::new(), &material);
        writer.write_all(&[1, 2, 3]).await.unwrap();
        assert!(writer.shutdown().await.is_err());
    }
}
