//! Download Manager: streams an encrypted backup object to a local file.
//!
//! Bytes flow `HTTP body -> CountingWriter -> DecryptWriter -> [DecompressWriter ->] File`.
//! Compressed backups are gzipped before encryption, so decryption always
//! comes first on the way back.

use std::io;
use std::path::Path;

use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_LENGTH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::counter::{CountingWriter, TransferCounter};
use super::progress::{Direction, ProgressReporter, TransferOutcome};
use crate::api::models::TempUrl;
use crate::api::{error_from_response, ApiClient};
use crate::compress::DecompressWriter;
use crate::config::ProgressConfig;
use crate::crypto::{CipherMaterial, DecryptWriter};
use crate::utils::errors::{Result, TransferError};

/// Object metadata header set on backups that were gzipped before encryption
const COMPRESSION_META_HEADER: &str = "x-amz-meta-datica-backup-compression";

type Sink = Box<dyn AsyncWrite + Unpin + Send>;

pub struct DownloadManager {
    api: ApiClient,
    progress: ProgressConfig,
}

impl DownloadManager {
    pub fn new(api: ApiClient, progress: ProgressConfig) -> Self {
        Self { api, progress }
    }

    pub async fn temp_download_url(&self, job_id: &str, service_id: &str) -> Result<TempUrl> {
        let path = self
            .api
            .service_path(service_id, &format!("/backup-url/{}", job_id));
        self.api.get(&path).await
    }

    /// Download and decrypt the backup of `job_id` into `path`.
    ///
    /// Returns the number of encrypted bytes received. On failure the partial
    /// file is removed.
    pub async fn download(
        &self,
        job_id: &str,
        service_id: &str,
        material: &CipherMaterial,
        path: &Path,
    ) -> Result<u64> {
        let temp = self.temp_download_url(job_id, service_id).await?;
        let resp = self.api.http().get(&temp.url).send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let size = content_length(resp.headers())?;
        let compressed = is_gzip(resp.headers());
        debug!(
            "Backup object for job {}: {} bytes, compressed: {}",
            job_id, size, compressed
        );

        let file = create_private(path).await?;
        let sink: Sink = if compressed {
            Box::new(DecompressWriter::new(file))
        } else {
            Box::new(file)
        };

        let counter = TransferCounter::new(size);
        let mut writer = CountingWriter::new(DecryptWriter::new(sink, material), counter.clone());
        let reporter = ProgressReporter::spawn(counter, Direction::Download, None, &self.progress);

        let mut body = StreamReader::new(
            resp.bytes_stream()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        );

        match pump(&mut body, &mut writer).await {
            Ok(received) => {
                reporter.finish(TransferOutcome::Success).await;
                info!("Downloaded {} encrypted bytes to {}", received, path.display());
                Ok(received)
            }
            Err(e) => {
                reporter.finish(TransferOutcome::Failure).await;
                let _ = writer.shutdown().await;
                drop(writer);
                if let Err(rm) = tokio::fs::remove_file(path).await {
                    warn!("Failed to remove partial file {}: {}", path.display(), rm);
                }
                Err(TransferError::from_io(e))
            }
        }
    }
}

/// Copy the body through the pipeline and close it, authenticating the stream.
async fn pump<R, W>(body: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let received = tokio::io::copy(body, writer).await?;
    writer.shutdown().await?;
    Ok(received)
}

fn content_length(headers: &HeaderMap) -> Result<u64> {
    let value = headers
        .get(CONTENT_LENGTH)
        .ok_or(TransferError::MissingContentLength)?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid Content-Length header: {:?}", value),
            ))
        })
}

fn is_gzip(headers: &HeaderMap) -> bool {
    [CONTENT_ENCODING.as_str(), COMPRESSION_META_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

/// Create (or truncate) a file readable only by the current user.
async fn create_private(path: &Path) -> Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    Ok(options.open(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::*;
    use crate::crypto::encrypt_bytes;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use bytes::Bytes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const JOB_ID: &str = "job-1";

    /// Backend that hands out its own `/object` as the temp URL and serves `object` there.
    async fn backend<F, R>(object: F) -> DownloadManager
    where
        F: Fn() -> R + Clone + Send + Sync + 'static,
        R: IntoResponse + Send + 'static,
    {
        let router = Router::new()
            .route(
                &route(&format!("/backup-url/{}", JOB_ID)),
                get(|headers: HeaderMap| async move {
                    let host = headers
                        .get("host")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    format!(r#"{{"url":"http://{}/object"}}"#, host)
                }),
            )
            .route(
                "/object",
                get(move || {
                    let object = object.clone();
                    async move { object() }
                }),
            );
        let base = serve(router).await;
        let config = config(&base);
        let api = ApiClient::new(&config).unwrap();
        DownloadManager::new(api, config.progress)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_plain_download() {
        let material = CipherMaterial::generate();
        let plain = b"COPY t FROM stdin;\n".repeat(4000);
        let sealed = encrypt_bytes(&material, &plain);

        let manager = backend(move || sealed.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");

        let received = manager.download(JOB_ID, SERVICE_ID, &material, &path).await.unwrap();
        assert_eq!(received as usize, plain.len() + crate::crypto::TAG_SIZE);
        assert_eq!(std::fs::read(&path).unwrap(), plain);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_gzip_download_via_metadata_header() {
        let material = CipherMaterial::generate();
        let plain = b"mongo archive bytes".repeat(3000);
        let sealed = encrypt_bytes(&material, &gzip(&plain));

        let manager = backend(move || {
            ([("x-amz-meta-datica-backup-compression", "gzip")], sealed.clone())
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tar");

        manager.download(JOB_ID, SERVICE_ID, &material, &path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), plain);
    }

    #[tokio::test]
    async fn test_gzip_download_via_content_encoding() {
        let material = CipherMaterial::generate();
        let mut compressed = gzip(b"part one;");
        compressed.extend(gzip(b"part two;"));
        let sealed = encrypt_bytes(&material, &compressed);

        let manager = backend(move || ([("content-encoding", "gzip")], sealed.clone())).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");

        manager.download(JOB_ID, SERVICE_ID, &material, &path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"part one;part two;");
    }

    #[tokio::test]
    async fn test_missing_content_length_creates_no_file() {
        let material = CipherMaterial::generate();
        let sealed = encrypt_bytes(&material, b"data");

        let manager = backend(move || {
            let chunks = vec![Ok::<_, io::Error>(Bytes::from(sealed.clone()))];
            Body::from_stream(futures_util::stream::iter(chunks))
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");

        let err = manager
            .download(JOB_ID, SERVICE_ID, &material, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MissingContentLength));
        assert_eq!(
            err.to_string(),
            "Export succeeded, but Content-Length was not present in the response."
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_integrity_failure_removes_partial_file() {
        let material = CipherMaterial::generate();
        let mut sealed = encrypt_bytes(&material, &vec![5u8; 100_000]);
        sealed[50_000] ^= 1;

        let manager = backend(move || sealed.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");

        let err = manager
            .download(JOB_ID, SERVICE_ID, &material, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Integrity(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_object_store_error_is_reported() {
        let material = CipherMaterial::generate();
        let manager =
            backend(|| (StatusCode::FORBIDDEN, "<Error>AccessDenied</Error>")).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");

        let err = manager
            .download(JOB_ID, SERVICE_ID, &material, &path)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(!path.exists());
    }

    #[test]
    fn test_is_gzip_headers() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip(&headers));
        headers.insert("x-amz-meta-backup-compression", "gzip".parse().unwrap());
        assert!(!is_gzip(&headers));
        headers.insert("x-amz-meta-datica-backup-compression", "GZIP".parse().unwrap());
        assert!(is_gzip(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "identity".parse().unwrap());
        assert!(!is_gzip(&headers));
    }
}
