//! Utility modules for the transfer client.

pub mod errors;
pub mod logger;

pub use errors::{Result, TransferError};
