//! Symmetric stream encryption for backup payloads and job logs.
//!
//! Payloads are AES-256-GCM with no associated data and a single 16-byte
//! authentication tag appended after the whole cipher-text, so the encrypted
//! length is always `plaintext + TAG_SIZE` no matter how the stream is chunked.
//!
//! - [`EncryptReader`] encrypts while reading (imports)
//! - [`DecryptWriter`] decrypts while writing and authenticates on shutdown (exports)

pub mod gcm;
pub mod reader;
pub mod writer;

pub use reader::{calculate_total_size, EncryptReader};
pub use writer::DecryptWriter;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::api::models::CipherRecord;
use crate::utils::errors::{Result, TransferError};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// IV size of the current scheme
pub const IV_SIZE: usize = 12;

/// IV size of the legacy scheme
pub const LEGACY_IV_SIZE: usize = 16;

/// GCM authentication tag size, the only per-stream overhead
pub const TAG_SIZE: usize = 16;

/// Key and IV for one transfer.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherMaterial {
    key: [u8; KEY_SIZE],
    iv: Vec<u8>,
}

impl std::fmt::Debug for CipherMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherMaterial")
            .field("key", &"[REDACTED]")
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

impl CipherMaterial {
    /// Validate sizes; nothing is encrypted or decrypted with bad material.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(TransferError::CipherMaterial(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        if iv.len() != IV_SIZE && iv.len() != LEGACY_IV_SIZE {
            return Err(TransferError::CipherMaterial(format!(
                "IV must be {} or {} bytes, got {}",
                IV_SIZE,
                LEGACY_IV_SIZE,
                iv.len()
            )));
        }
        let mut k = [0u8; KEY_SIZE];
        k.copy_from_slice(key);
        Ok(Self {
            key: k,
            iv: iv.to_vec(),
        })
    }

    /// Fresh random material for an import.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = vec![0u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_hex(key: &str, iv: &str) -> Result<Self> {
        let key = hex::decode(key.trim())
            .map_err(|e| TransferError::CipherMaterial(format!("invalid hex key: {}", e)))?;
        let iv = hex::decode(iv.trim())
            .map_err(|e| TransferError::CipherMaterial(format!("invalid hex IV: {}", e)))?;
        Self::new(&key, &iv)
    }

    /// Material for a job's payload.
    pub fn from_record(record: &CipherRecord) -> Result<Self> {
        Self::from_hex(&record.key, &record.iv)
    }

    /// Material for a job's logs; `keyLogs` wins over `key` when present.
    pub fn for_logs(record: &CipherRecord) -> Result<Self> {
        let key = if record.key_logs.is_empty() {
            &record.key
        } else {
            &record.key_logs
        };
        Self::from_hex(key, &record.iv)
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn is_legacy(&self) -> bool {
        self.iv.len() == LEGACY_IV_SIZE
    }

    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(&self.iv)
    }
}

/// Encrypt a small in-memory payload.
pub fn encrypt_bytes(material: &CipherMaterial, plaintext: &[u8]) -> Vec<u8> {
    let mut encryptor = gcm::Encryptor::new(material);
    let mut out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    out.extend_from_slice(plaintext);
    encryptor.encrypt_in_place(&mut out);
    out.extend_from_slice(&encryptor.finish());
    out
}

/// Decrypt and authenticate a small in-memory payload.
pub fn decrypt_bytes(material: &CipherMaterial, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut decryptor = gcm::Decryptor::new(material);
    let mut out = Vec::with_capacity(ciphertext.len());
    decryptor.update(ciphertext, &mut out);
    decryptor.finish()?;
    Ok(out)
}
