//! db-transfer library
//!
//! Encrypted streaming export, import and restore of database dumps against a
//! remote job backend.

pub mod api;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod db;
pub mod jobs;
pub mod prompts;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{Result, TransferError};
