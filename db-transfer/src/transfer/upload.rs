//! Upload strategies for encrypted imports.
//!
//! Backends older than [`MULTIPART_MIN_VERSION`] accept one pre-signed PUT of
//! at most 5 GB; newer ones take a multipart session of up to 5 TB. The
//! strategy is picked once per import from the `/healthcheck` version and
//! used through the [`Uploader`] trait.

use std::cmp::Ordering;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_LENGTH;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::counter::{CountingReader, TransferCounter};
use super::progress::{Direction, ProgressReporter, TransferOutcome};
use super::progress_stream::ProgressStream;
use crate::api::models::{Location, MultipartUploadInfo, PartRecord, TempUrl, VersionInfo};
use crate::api::ApiClient;
use crate::config::{ProgressConfig, TransferConfig};
use crate::utils::errors::{Result, TransferError};

pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * MB;
pub const TB: u64 = 1024 * GB;

/// Largest cipher-text accepted by a single-shot upload
pub const SINGLE_UPLOAD_LIMIT: u64 = 5 * GB;

/// Largest cipher-text accepted by a multipart upload
pub const MULTIPART_UPLOAD_LIMIT: u64 = 5 * TB;

pub const DEFAULT_CHUNK_SIZE: u64 = 100 * MB;

/// Chunk size once the upload exceeds [`LARGE_UPLOAD_THRESHOLD`]
pub const LARGE_CHUNK_SIZE: u64 = 500 * MB;

pub const LARGE_UPLOAD_THRESHOLD: u64 = TB;

/// First backend version that supports multipart uploads
pub const MULTIPART_MIN_VERSION: &str = "4.1.0";

/// Encrypted input of an upload.
pub type UploadSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Split of a cipher-text stream into consecutive parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(total: u64) -> Self {
        let chunk_size = if total > LARGE_UPLOAD_THRESHOLD {
            LARGE_CHUNK_SIZE
        } else {
            DEFAULT_CHUNK_SIZE
        };
        Self::with_chunk_size(total, chunk_size)
    }

    pub fn with_chunk_size(total: u64, chunk_size: u64) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> u64 {
        self.total.div_ceil(self.chunk_size)
    }

    /// `(part_number, size)` pairs; part numbers start at 1 and only the last
    /// part may be short.
    pub fn chunks(&self) -> impl Iterator<Item = (u64, u64)> {
        let plan = *self;
        (1..=plan.num_chunks()).map(move |part| {
            let offset = (part - 1) * plan.chunk_size;
            (part, plan.chunk_size.min(plan.total - offset))
        })
    }
}

/// Which upload strategy the backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Single,
    Multipart,
}

impl UploadMode {
    pub fn from_version(version: &str) -> Self {
        if compare_versions(version, MULTIPART_MIN_VERSION) == Ordering::Less {
            UploadMode::Single
        } else {
            UploadMode::Multipart
        }
    }

    /// Ask the backend which strategy to use.
    pub async fn probe(api: &ApiClient) -> Result<Self> {
        let info: VersionInfo = api.get("/healthcheck").await?;
        let mode = Self::from_version(&info.version);
        debug!("Backend version {:?}, upload mode {:?}", info.version, mode);
        Ok(mode)
    }

    pub fn limit(&self) -> u64 {
        match self {
            UploadMode::Single => SINGLE_UPLOAD_LIMIT,
            UploadMode::Multipart => MULTIPART_UPLOAD_LIMIT,
        }
    }

    pub fn limit_label(&self) -> &'static str {
        match self {
            UploadMode::Single => "5 GB",
            UploadMode::Multipart => "5 TB",
        }
    }

    /// Fail if `size` bytes of cipher-text cannot be uploaded in this mode.
    pub fn check_size(&self, path: &Path, size: u64) -> Result<()> {
        if size > self.limit() {
            return Err(TransferError::UploadTooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.limit_label().to_string(),
            });
        }
        Ok(())
    }

    pub fn uploader(
        &self,
        api: ApiClient,
        service_id: &str,
        transfer: &TransferConfig,
        progress: &ProgressConfig,
    ) -> Box<dyn Uploader> {
        match self {
            UploadMode::Single => Box::new(SingleUpload::new(api, service_id, progress.clone())),
            UploadMode::Multipart => Box::new(MultipartUpload::new(
                api,
                service_id,
                transfer.clone(),
                progress.clone(),
            )),
        }
    }
}

/// Numeric dotted-version comparison; missing components count as zero.
fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(v: &str) -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|p| {
                let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    }
    let (a, b) = (parts(a), parts(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload exactly `length` bytes of `source`; returns the remote file name.
    async fn upload(&self, source: UploadSource, length: u64) -> Result<String>;
}

/// Run `f` up to `attempts` times, sleeping `delay` between failures.
async fn retry<T, F, Fut>(attempts: u32, delay: Duration, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(TransferError::RetriesExhausted {
                    operation: operation.to_string(),
                    source: Box::new(e),
                })
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} to {} failed: {}",
                    attempt, attempts, operation, e
                );
            }
        }
        attempt += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn too_large(length: u64, mode: UploadMode) -> TransferError {
    TransferError::UploadTooLarge {
        path: "upload stream".into(),
        size: length,
        limit: mode.limit_label().to_string(),
    }
}

/// One pre-signed PUT of the whole cipher-text.
pub struct SingleUpload {
    api: ApiClient,
    service_id: String,
    progress: ProgressConfig,
}

impl SingleUpload {
    pub fn new(api: ApiClient, service_id: &str, progress: ProgressConfig) -> Self {
        Self {
            api,
            service_id: service_id.to_string(),
            progress,
        }
    }

    pub async fn temp_upload_url(&self) -> Result<TempUrl> {
        let path = self.api.service_path(&self.service_id, "/restore-url");
        self.api.get(&path).await
    }
}

#[async_trait]
impl Uploader for SingleUpload {
    async fn upload(&self, source: UploadSource, length: u64) -> Result<String> {
        if length > SINGLE_UPLOAD_LIMIT {
            return Err(too_large(length, UploadMode::Single));
        }
        let temp = self.temp_upload_url().await?;
        let url = reqwest::Url::parse(&temp.url)
            .map_err(|e| TransferError::InvalidJob(format!("invalid upload URL: {}", e)))?;
        let file_name = url.path().trim_start_matches('/').to_string();

        let counter = TransferCounter::new(length);
        let body = reqwest::Body::wrap_stream(ReaderStream::new(CountingReader::new(
            source,
            counter.clone(),
        )));
        let reporter = ProgressReporter::spawn(counter, Direction::Upload, None, &self.progress);

        let sent = self
            .api
            .http()
            .put(url)
            .header("x-amz-server-side-encryption", "AES256")
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                reporter.finish(TransferOutcome::Failure).await;
                return Err(TransferError::Http(e));
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            reporter.finish(TransferOutcome::Failure).await;
            let body = resp.text().await.unwrap_or_default();
            debug!("Error uploading import file: {} {}", status, body);
            return Err(TransferError::Api {
                status,
                body: format!("Failed to upload import file - received status code {}", status),
            });
        }
        reporter.finish(TransferOutcome::Success).await;
        Ok(file_name)
    }
}

/// Sequential multipart upload with per-part retry.
pub struct MultipartUpload {
    api: ApiClient,
    service_id: String,
    transfer: TransferConfig,
    progress: ProgressConfig,
    chunk_size: Option<u64>,
}

impl MultipartUpload {
    pub fn new(
        api: ApiClient,
        service_id: &str,
        transfer: TransferConfig,
        progress: ProgressConfig,
    ) -> Self {
        Self {
            api,
            service_id: service_id.to_string(),
            transfer,
            progress,
            chunk_size: None,
        }
    }

    /// Use a fixed chunk size instead of the size-based default.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn plan(&self, length: u64) -> ChunkPlan {
        match self.chunk_size {
            Some(size) => ChunkPlan::with_chunk_size(length, size),
            None => ChunkPlan::new(length),
        }
    }

    fn path(&self, rest: &str) -> String {
        self.api.service_path(&self.service_id, rest)
    }

    pub async fn initiate(&self) -> Result<MultipartUploadInfo> {
        let path = self.path("/initiate-multipart-upload");
        retry(
            self.transfer.initiate_attempts,
            Duration::ZERO,
            "initiate upload",
            || self.api.post_empty(&path),
        )
        .await
    }

    pub async fn part_url(&self, info: &MultipartUploadInfo, part: u64) -> Result<TempUrl> {
        let part = part.to_string();
        self.api
            .get_query(
                &self.path("/multipart-upload-url"),
                &[
                    ("fileName", info.file_name.as_str()),
                    ("partNumber", part.as_str()),
                    ("uploadId", info.upload_id.as_str()),
                ],
            )
            .await
    }

    pub async fn complete(
        &self,
        info: &MultipartUploadInfo,
        parts: &[PartRecord],
    ) -> Result<Location> {
        let path = self.path("/complete-multipart-upload");
        let query = [
            ("fileName", info.file_name.as_str()),
            ("uploadId", info.upload_id.as_str()),
        ];
        retry(
            self.transfer.complete_attempts,
            Duration::ZERO,
            "complete upload",
            || self.api.post_query(&path, &query, parts),
        )
        .await
    }

    /// Release an abandoned session. Failures are only logged.
    pub async fn abort(&self, info: &MultipartUploadInfo) {
        let path = self.path("/abort-multipart-upload");
        let query = [
            ("fileName", info.file_name.as_str()),
            ("uploadId", info.upload_id.as_str()),
        ];
        match self
            .api
            .post_query::<_, serde_json::Value>(&path, &query, &serde_json::json!({}))
            .await
        {
            Ok(_) => info!("Aborted multipart upload {}", info.upload_id),
            Err(e) => warn!("Failed to abort multipart upload {}: {}", info.upload_id, e),
        }
    }

    /// One PUT of a buffered part, with its own progress line.
    async fn put_part_once(&self, url: &str, part: u64, total_parts: u64, data: Bytes) -> Result<String> {
        let length = data.len() as u64;
        let counter = TransferCounter::new(length);
        let body = reqwest::Body::wrap_stream(ProgressStream::from_bytes(data, counter.clone()));
        let reporter = ProgressReporter::spawn(
            counter,
            Direction::Upload,
            Some((part, total_parts)),
            &self.progress,
        );

        let sent = self
            .api
            .http()
            .put(url)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                reporter.finish(TransferOutcome::Failure).await;
                warn!("Chunk upload {} failed. Err: {}", part, e);
                return Err(TransferError::Http(e));
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            reporter.finish(TransferOutcome::Failure).await;
            let body = resp.text().await.unwrap_or_default();
            warn!(
                "Chunk upload {} failed. Response code: {} {}",
                part, status, body
            );
            return Err(TransferError::ChunkUpload { part, status, body });
        }

        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        reporter.finish(TransferOutcome::Success).await;
        Ok(etag)
    }

    async fn upload_parts(
        &self,
        info: &MultipartUploadInfo,
        plan: &ChunkPlan,
        source: &mut UploadSource,
    ) -> Result<Vec<PartRecord>> {
        let total_parts = plan.num_chunks();
        let mut parts = Vec::with_capacity(total_parts as usize);

        for (part, size) in plan.chunks() {
            let temp = self.part_url(info, part).await?;
            let data = read_chunk(source, size).await?;
            let etag = retry(
                self.transfer.chunk_attempts,
                self.transfer.chunk_retry_delay(),
                &format!("upload part {}", part),
                || self.put_part_once(&temp.url, part, total_parts, data.clone()),
            )
            .await?;
            debug!("Part {} of {} uploaded, ETag {}", part, total_parts, etag);
            parts.push(PartRecord {
                part_number: part,
                etag,
            });
        }
        Ok(parts)
    }
}

/// Read exactly `size` bytes; anything less is an integrity failure.
async fn read_chunk(source: &mut UploadSource, size: u64) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(size as usize);
    (&mut *source).take(size).read_to_end(&mut buf).await?;
    if (buf.len() as u64) < size {
        return Err(TransferError::ShortRead {
            expected: size,
            read: buf.len() as u64,
        });
    }
    Ok(Bytes::from(buf))
}

#[async_trait]
impl Uploader for MultipartUpload {
    async fn upload(&self, mut source: UploadSource, length: u64) -> Result<String> {
        if length > MULTIPART_UPLOAD_LIMIT {
            return Err(too_large(length, UploadMode::Multipart));
        }
        let info = self.initiate().await?;
        let plan = self.plan(length);
        info!(
            "Uploading {} bytes in {} part(s) as {}",
            length,
            plan.num_chunks(),
            info.file_name
        );

        let result = match self.upload_parts(&info, &plan, &mut source).await {
            Ok(parts) => self.complete(&info, &parts).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.abort(&info).await;
            return Err(e);
        }
        Ok(info.file_name)
    }
}
