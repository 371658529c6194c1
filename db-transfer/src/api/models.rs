//! Wire models exchanged with the job backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statuses during which a job is still expected to change.
const IN_PROGRESS_STATUSES: &[&str] = &["scheduled", "queued", "started", "running", "waiting"];

/// Job status as reported by the backend. Unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobStatus(pub String);

impl JobStatus {
    pub const FINISHED: &'static str = "finished";
    pub const DISAPPEARED: &'static str = "disappeared";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_finished(&self) -> bool {
        self.0 == Self::FINISHED
    }

    /// Still moving; polling continues only while this holds.
    pub fn is_in_progress(&self) -> bool {
        IN_PROGRESS_STATUSES.contains(&self.0.as_str())
    }

    /// The object behind a `disappeared` job is still retrievable.
    pub fn is_downloadable(&self) -> bool {
        self.is_finished() || self.0 == Self::DISAPPEARED
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
    #[serde(other)]
    Other,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
            JobKind::Other => "other",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex-encoded key material attached to a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CipherRecord {
    #[serde(default)]
    pub key: String,
    #[serde(default, rename = "keyLogs")]
    pub key_logs: String,
    #[serde(default)]
    pub iv: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: String,

    #[serde(default, rename = "type")]
    pub kind: Option<JobKind>,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default, rename = "isSnapshotBackup")]
    pub is_snapshot_backup: Option<bool>,

    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<String>,

    #[serde(default)]
    pub backup: Option<CipherRecord>,

    #[serde(default)]
    pub restore: Option<CipherRecord>,
}

impl Job {
    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot_backup.unwrap_or(false)
    }

    /// `createdAt` as a timestamp; bare dates count as midnight UTC.
    pub fn created_at_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Cipher record for the payload/logs of the given job kind.
    pub fn cipher_record(&self, kind: JobKind) -> Option<&CipherRecord> {
        match kind {
            JobKind::Backup => self.backup.as_ref(),
            JobKind::Restore => self.restore.as_ref(),
            JobKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TempUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// One acknowledged multipart chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    #[serde(rename = "PartNumber")]
    pub part_number: u64,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub name: String,
}

/// Response of the complete-multipart-upload call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    #[serde(default, rename = "Location", alias = "location")]
    pub location: Option<String>,
}
