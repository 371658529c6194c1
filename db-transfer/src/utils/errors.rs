//! Custom error types for the transfer pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-2xx response from the remote API
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Could not find a service with the label \"{0}\"")]
    ServiceNotFound(String),

    #[error("File already exists at path '{}'. Specify `--force` to overwrite", .0.display())]
    FileExists(PathBuf),

    #[error("A file does not exist at path '{}'", .0.display())]
    FileNotFound(PathBuf),

    #[error("The encrypted size of {} ({size} bytes) exceeds the maximum upload size of {limit}", .path.display())]
    UploadTooLarge {
        path: PathBuf,
        size: u64,
        limit: String,
    },

    #[error("Export succeeded, but Content-Length was not present in the response.")]
    MissingContentLength,

    #[error("Invalid cipher material: {0}")]
    CipherMaterial(String),

    /// Authentication tag mismatch or otherwise corrupt cipher-text
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Failed to read from file - attempted to read {expected} but read {read}. Import failed.")]
    ShortRead { expected: u64, read: u64 },

    #[error("{0}")]
    InvalidJob(String),

    #[error("Job {job_id} finished with invalid status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("Timed out after {secs}s waiting for job {job_id}")]
    PollTimeout { job_id: String, secs: u64 },

    #[error("Failed to {operation} - {source}")]
    RetriesExhausted {
        operation: String,
        #[source]
        source: Box<TransferError>,
    },

    #[error("Failed to upload part {part} - received status code {status} {body}")]
    ChunkUpload { part: u64, status: u16, body: String },

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Operation aborted: {0}")]
    Aborted(String),
}

impl TransferError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Api { status, .. } => Some(*status),
            TransferError::ChunkUpload { status, .. } => Some(*status),
            TransferError::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Wrap into an `io::Error` so it can cross `AsyncRead`/`AsyncWrite` boundaries.
    pub fn into_io(self) -> std::io::Error {
        let kind = match &self {
            TransferError::Io(e) => e.kind(),
            TransferError::Integrity(_) => std::io::ErrorKind::InvalidData,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, self)
    }

    /// Recover a `TransferError` previously wrapped by [`TransferError::into_io`].
    pub fn from_io(err: std::io::Error) -> TransferError {
        let wrapped = err
            .get_ref()
            .map_or(false, |inner| inner.is::<TransferError>());
        if !wrapped {
            return TransferError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<TransferError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => TransferError::Io(std::io::Error::new(kind, other)),
            None => TransferError::Io(kind.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_unwrapped_from_retries() {
        let err = TransferError::RetriesExhausted {
            operation: "complete upload".to_string(),
            source: Box::new(TransferError::Api {
                status: 503,
                body: "busy".to_string(),
            }),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(
            err.to_string(),
            "Failed to complete upload - API error (503): busy"
        );
    }

    #[test]
    fn test_not_found() {
        let err = TransferError::Api {
            status: 404,
            body: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!TransferError::MissingContentLength.is_not_found());
    }

    #[test]
    fn test_io_round_trip_keeps_variant() {
        let io = TransferError::Integrity("message authentication failed".to_string()).into_io();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
        assert!(matches!(
            TransferError::from_io(io),
            TransferError::Integrity(msg) if msg == "message authentication failed"
        ));

        let plain = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(TransferError::from_io(plain), TransferError::Io(_)));
    }

    #[test]
    fn test_file_exists_message() {
        let err = TransferError::FileExists(PathBuf::from("dump.sql"));
        assert_eq!(
            err.to_string(),
            "File already exists at path 'dump.sql'. Specify `--force` to overwrite"
        );
    }
}
