//! Encrypt-while-reading adapter used for imports.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use super::gcm::Encryptor;
use super::{CipherMaterial, TAG_SIZE};

/// Exact cipher-text length for `plaintext_len` bytes of input.
pub fn calculate_total_size(plaintext_len: u64) -> u64 {
    plaintext_len + TAG_SIZE as u64
}

/// Yields the cipher-text of `inner` followed by the authentication tag.
pub struct EncryptReader<R> {
    inner: R,
    encryptor: Option<Encryptor>,
    tag: [u8; TAG_SIZE],
    tag_pos: usize,
}

impl<R: AsyncRead + Unpin> EncryptReader<R> {
    pub fn new(inner: R, material: &CipherMaterial) -> Self {
        Self {
            inner,
            encryptor: Some(Encryptor::new(material)),
            tag: [0u8; TAG_SIZE],
            tag_pos: TAG_SIZE,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for EncryptReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if let Some(encryptor) = this.encryptor.as_mut() {
            let before = buf.filled().len();
            match Pin::new(&mut this.inner).poll_read(cx, buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {}
            }
            let filled = buf.filled_mut();
            if filled.len() > before {
                encryptor.encrypt_in_place(&mut filled[before..]);
                return Poll::Ready(Ok(()));
            }

            // Source exhausted: switch to emitting the tag
            if let Some(encryptor) = this.encryptor.take() {
                this.tag = encryptor.finish();
                this.tag_pos = 0;
            }
        }

        let n = (TAG_SIZE - this.tag_pos).min(buf.remaining());
        buf.put_slice(&this.tag[this.tag_pos..this.tag_pos + n]);
        this.tag_pos += n;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_bytes, encrypt_bytes};
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_total_size_adds_one_tag() {
        assert_eq!(calculate_total_size(0), 16);
        assert_eq!(calculate_total_size(250 * 1024 * 1024), 250 * 1024 * 1024 + 16);
    }

    #[tokio::test]
    async fn test_reader_matches_one_shot() {
        let material = CipherMaterial::generate();
        let plaintext: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();

        let mut reader = EncryptReader::new(&plaintext[..], &material);
        let mut sealed = Vec::new();
        reader.read_to_end(&mut sealed).await.unwrap();

        assert_eq!(sealed.len() as u64, calculate_total_size(plaintext.len() as u64));
        assert_eq!(sealed, encrypt_bytes(&material, &plaintext));
        assert_eq!(decrypt_bytes(&material, &sealed).unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_tag_is_split_across_small_reads() {
        let material = CipherMaterial::generate();
        let mut reader = EncryptReader::new(&b"abc"[..], &material);

        let mut sealed = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            sealed.extend_from_slice(&buf[..n]);
        }
        assert_eq!(sealed, encrypt_bytes(&material, b"abc"));

        // Stays at EOF once the tag is out
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exact_reads_cover_chunk_boundaries() {
        let material = CipherMaterial::generate();
        let plaintext = vec![0x42u8; 100];
        let mut reader = EncryptReader::new(&plaintext[..], &material);

        let mut first = vec![0u8; 64];
        reader.read_exact(&mut first).await.unwrap();
        let mut second = vec![0u8; 52];
        reader.read_exact(&mut second).await.unwrap();

        let mut joined = first;
        joined.extend_from_slice(&second);
        assert_eq!(joined, encrypt_bytes(&material, &plaintext));
    }
}
