//! Incremental AES-256-GCM.
//!
//! One-shot AEAD APIs need the whole message in memory, which does not work for
//! multi-gigabyte dumps. This core keeps the counter-mode keystream and the
//! GHASH state between calls so any split of the input produces the same
//! cipher-text and tag as a one-shot seal.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;

use super::{CipherMaterial, IV_SIZE, TAG_SIZE};
use crate::utils::errors::{Result, TransferError};

const BLOCK_SIZE: usize = 16;

/// Blocks encrypted per keystream refill
const KEYSTREAM_BLOCKS: usize = 8;

const KEYSTREAM_LEN: usize = BLOCK_SIZE * KEYSTREAM_BLOCKS;

/// Increment the low 32 bits of a counter block, wrapping.
fn inc32(block: &mut [u8; BLOCK_SIZE]) {
    let mut ctr = [0u8; 4];
    ctr.copy_from_slice(&block[12..]);
    let next = u32::from_be_bytes(ctr).wrapping_add(1);
    block[12..].copy_from_slice(&next.to_be_bytes());
}

struct Gcm {
    cipher: Aes256,
    ghash: GHash,
    counter: [u8; BLOCK_SIZE],
    keystream: [u8; KEYSTREAM_LEN],
    keystream_pos: usize,
    tag_mask: [u8; BLOCK_SIZE],
    partial: [u8; BLOCK_SIZE],
    partial_len: usize,
    cipher_len: u64,
}

impl Gcm {
    fn new(material: &CipherMaterial) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(material.key()));

        let mut h = GenericArray::default();
        cipher.encrypt_block(&mut h);
        let ghash = GHash::new(&h);

        let mut j0 = [0u8; BLOCK_SIZE];
        let iv = material.iv();
        if iv.len() == IV_SIZE {
            j0[..IV_SIZE].copy_from_slice(iv);
            j0[BLOCK_SIZE - 1] = 1;
        } else {
            // Non-96-bit IVs are hashed into the pre-counter block
            let mut hasher = ghash.clone();
            hasher.update_padded(iv);
            let mut lens = [0u8; BLOCK_SIZE];
            lens[8..].copy_from_slice(&((iv.len() as u64) * 8).to_be_bytes());
            hasher.update(&[GenericArray::clone_from_slice(&lens)]);
            j0.copy_from_slice(&hasher.finalize());
        }

        let mut mask = GenericArray::clone_from_slice(&j0);
        cipher.encrypt_block(&mut mask);
        let mut tag_mask = [0u8; BLOCK_SIZE];
        tag_mask.copy_from_slice(&mask);

        let mut counter = j0;
        inc32(&mut counter);

        Self {
            cipher,
            ghash,
            counter,
            keystream: [0u8; KEYSTREAM_LEN],
            keystream_pos: KEYSTREAM_LEN,
            tag_mask,
            partial: [0u8; BLOCK_SIZE],
            partial_len: 0,
            cipher_len: 0,
        }
    }

    fn refill(&mut self) {
        let mut blocks = [GenericArray::default(); KEYSTREAM_BLOCKS];
        for block in blocks.iter_mut() {
            block.copy_from_slice(&self.counter);
            inc32(&mut self.counter);
        }
        self.cipher.encrypt_blocks(&mut blocks);
        for (dst, block) in self.keystream.chunks_exact_mut(BLOCK_SIZE).zip(blocks.iter()) {
            dst.copy_from_slice(block);
        }
        self.keystream_pos = 0;
    }

    /// XOR the counter-mode keystream into `data`.
    fn apply_keystream(&mut self, data: &mut [u8]) {
        let mut done = 0;
        while done < data.len() {
            if self.keystream_pos == KEYSTREAM_LEN {
                self.refill();
            }
            let n = (KEYSTREAM_LEN - self.keystream_pos).min(data.len() - done);
            let keystream = &self.keystream[self.keystream_pos..self.keystream_pos + n];
            for (byte, k) in data[done..done + n].iter_mut().zip(keystream) {
                *byte ^= k;
            }
            self.keystream_pos += n;
            done += n;
        }
    }

    /// Feed cipher-text into GHASH.
    fn absorb(&mut self, mut data: &[u8]) {
        self.cipher_len += data.len() as u64;

        if self.partial_len > 0 {
            let n = (BLOCK_SIZE - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + n].copy_from_slice(&data[..n]);
            self.partial_len += n;
            data = &data[n..];
            if self.partial_len < BLOCK_SIZE {
                return;
            }
            self.ghash.update_padded(&self.partial);
            self.partial_len = 0;
        }

        let full = data.len() - data.len() % BLOCK_SIZE;
        if full > 0 {
            self.ghash.update_padded(&data[..full]);
        }
        let rest = &data[full..];
        self.partial[..rest.len()].copy_from_slice(rest);
        self.partial_len = rest.len();
    }

    fn tag(mut self) -> [u8; TAG_SIZE] {
        if self.partial_len > 0 {
            self.ghash.update_padded(&self.partial[..self.partial_len]);
        }
        // No associated data, so the AAD length half stays zero
        let mut lens = [0u8; BLOCK_SIZE];
        lens[8..].copy_from_slice(&(self.cipher_len * 8).to_be_bytes());
        self.ghash.update(&[GenericArray::clone_from_slice(&lens)]);

        let digest = self.ghash.finalize();
        let mut tag = [0u8; TAG_SIZE];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = digest[i] ^ self.tag_mask[i];
        }
        tag
    }
}

/// Encrypting half of the stream cipher.
pub struct Encryptor {
    gcm: Gcm,
}

impl Encryptor {
    pub fn new(material: &CipherMaterial) -> Self {
        Self {
            gcm: Gcm::new(material),
        }
    }

    /// Replace plaintext with cipher-text.
    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        self.gcm.apply_keystream(data);
        self.gcm.absorb(data);
    }

    /// Authentication tag over everything encrypted so far.
    pub fn finish(self) -> [u8; TAG_SIZE] {
        self.gcm.tag()
    }
}

/// Decrypting half of the stream cipher.
///
/// The tag is only known once the input ends, so the most recent
/// [`TAG_SIZE`] bytes are always held back from the output.
pub struct Decryptor {
    gcm: Gcm,
    held: Vec<u8>,
}

impl Decryptor {
    pub fn new(material: &CipherMaterial) -> Self {
        Self {
            gcm: Gcm::new(material),
            held: Vec::with_capacity(TAG_SIZE),
        }
    }

    /// Decrypt `input`, appending whatever plaintext can be released to `out`.
    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let total = self.held.len() + input.len();
        if total <= TAG_SIZE {
            self.held.extend_from_slice(input);
            return;
        }

        let release = total - TAG_SIZE;
        let from_held = release.min(self.held.len());
        let from_input = release - from_held;

        let start = out.len();
        out.extend_from_slice(&self.held[..from_held]);
        out.extend_from_slice(&input[..from_input]);
        self.held.drain(..from_held);
        self.held.extend_from_slice(&input[from_input..]);

        self.gcm.absorb(&out[start..]);
        self.gcm.apply_keystream(&mut out[start..]);
    }

    /// Verify the held-back tag against the cipher-text seen.
    pub fn finish(self) -> Result<()> {
        if self.held.len() < TAG_SIZE {
            return Err(TransferError::Integrity(
                "cipher-text is shorter than the authentication tag".to_string(),
            ));
        }
        let expected = self.gcm.tag();
        if bool::from(expected[..].ct_eq(&self.held[..])) {
            Ok(())
        } else {
            Err(TransferError::Integrity(
                "message authentication failed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KEY_SIZE, LEGACY_IV_SIZE};
    use aes_gcm::aead::consts::U16;
    use aes_gcm::aead::Aead;
    use aes_gcm::{AesGcm, Aes256Gcm};
    use proptest::prelude::*;

    fn oracle(material: &CipherMaterial, plaintext: &[u8]) -> Vec<u8> {
        let key = GenericArray::from_slice(material.key());
        if material.is_legacy() {
            AesGcm::<Aes256, U16>::new(key)
                .encrypt(GenericArray::from_slice(material.iv()), plaintext)
                .unwrap()
        } else {
            Aes256Gcm::new(key)
                .encrypt(GenericArray::from_slice(material.iv()), plaintext)
                .unwrap()
        }
    }

    fn seal_in_pieces(material: &CipherMaterial, plaintext: &[u8], piece: usize) -> Vec<u8> {
        let mut encryptor = Encryptor::new(material);
        let mut out = Vec::new();
        for chunk in plaintext.chunks(piece.max(1)) {
            let mut buf = chunk.to_vec();
            encryptor.encrypt_in_place(&mut buf);
            out.extend_from_slice(&buf);
        }
        out.extend_from_slice(&encryptor.finish());
        out
    }

    fn open_in_pieces(material: &CipherMaterial, ciphertext: &[u8], piece: usize) -> Result<Vec<u8>> {
        let mut decryptor = Decryptor::new(material);
        let mut out = Vec::new();
        for chunk in ciphertext.chunks(piece.max(1)) {
            decryptor.update(chunk, &mut out);
        }
        decryptor.finish()?;
        Ok(out)
    }

    fn legacy_material() -> CipherMaterial {
        let key: Vec<u8> = (0..KEY_SIZE as u8).collect();
        let iv: Vec<u8> = (100..100 + LEGACY_IV_SIZE as u8).collect();
        CipherMaterial::new(&key, &iv).unwrap()
    }

    #[test]
    fn test_inc32_wraps_low_word_only() {
        let mut block = [0xffu8; BLOCK_SIZE];
        block[11] = 0x07;
        inc32(&mut block);
        assert_eq!(&block[12..], &[0, 0, 0, 0]);
        assert_eq!(block[11], 0x07);
    }

    #[test]
    fn test_matches_oracle_across_keystream_boundaries() {
        let material = CipherMaterial::generate();
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let expected = oracle(&material, &plaintext);
        for piece in [1, 5, 16, 17, KEYSTREAM_LEN - 1, KEYSTREAM_LEN, 999, 1000] {
            assert_eq!(seal_in_pieces(&material, &plaintext, piece), expected, "piece {piece}");
        }
    }

    #[test]
    fn test_legacy_iv_matches_oracle() {
        let material = legacy_material();
        let plaintext = b"legacy exports still carry sixteen byte IVs".repeat(9);
        let expected = oracle(&material, &plaintext);
        assert_eq!(seal_in_pieces(&material, &plaintext, 33), expected);
        assert_eq!(open_in_pieces(&material, &expected, 7).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext_is_just_the_tag() {
        let material = CipherMaterial::generate();
        let sealed = seal_in_pieces(&material, b"", 1);
        assert_eq!(sealed.len(), TAG_SIZE);
        assert_eq!(sealed, oracle(&material, b""));
        assert!(open_in_pieces(&material, &sealed, 3).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let material = CipherMaterial::generate();
        let mut sealed = oracle(&material, b"SELECT 1;");
        sealed[2] ^= 0x01;
        let err = open_in_pieces(&material, &sealed, 4).unwrap_err();
        assert!(matches!(err, TransferError::Integrity(msg) if msg == "message authentication failed"));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let material = CipherMaterial::generate();
        let mut sealed = oracle(&material, b"SELECT 1;");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert!(open_in_pieces(&material, &sealed, 64).is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let material = CipherMaterial::generate();
        let sealed = oracle(&material, b"SELECT 1;");
        let err = open_in_pieces(&material, &sealed[..TAG_SIZE - 1], 4).unwrap_err();
        assert!(matches!(err, TransferError::Integrity(msg) if msg.contains("shorter")));
        assert!(open_in_pieces(&material, &sealed[..sealed.len() - 1], 4).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = oracle(&CipherMaterial::generate(), b"SELECT 1;");
        assert!(open_in_pieces(&CipherMaterial::generate(), &sealed, 4).is_err());
    }

    proptest! {
        #[test]
        fn prop_streaming_round_trip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
            seal_piece in 1usize..300,
            open_piece in 1usize..300,
        ) {
            let material = CipherMaterial::generate();
            let sealed = seal_in_pieces(&material, &plaintext, seal_piece);
            prop_assert_eq!(sealed.len(), plaintext.len() + TAG_SIZE);
            prop_assert_eq!(&sealed, &oracle(&material, &plaintext));
            prop_assert_eq!(open_in_pieces(&material, &sealed, open_piece).unwrap(), plaintext);
        }
    }
}
