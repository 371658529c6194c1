//! Retrieval of a job's encrypted log stream.

use std::io::Write;

use tracing::debug;

use crate::api::models::{Job, JobKind, TempUrl};
use crate::api::{error_from_response, ApiClient};
use crate::crypto::{decrypt_bytes, CipherMaterial};
use crate::utils::errors::{Result, TransferError};

#[derive(Clone)]
pub struct JobLogs {
    api: ApiClient,
}

impl JobLogs {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn logs_url(&self, job_id: &str, service_id: &str) -> Result<TempUrl> {
        let path = self
            .api
            .service_path(service_id, &format!("/backup-restore-logs-url/{}", job_id));
        self.api.get(&path).await
    }

    /// Download and decrypt the logs of `job`, using its `kind` key material.
    pub async fn fetch(&self, kind: JobKind, job: &Job, service_id: &str) -> Result<String> {
        let record = job.cipher_record(kind).ok_or_else(|| {
            TransferError::InvalidJob(format!(
                "Job {} carries no {} key material",
                job.id, kind
            ))
        })?;
        let material = CipherMaterial::for_logs(record)?;

        let temp = self.logs_url(&job.id, service_id).await?;
        let resp = self.api.http().get(&temp.url).send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let sealed = resp.bytes().await?;
        debug!("Fetched {} bytes of {} logs for job {}", sealed.len(), kind, job.id);

        let plain = decrypt_bytes(&material, &sealed)?;
        Ok(String::from_utf8_lossy(&plain).into_owned())
    }

    /// Write the logs between banner lines.
    pub async fn dump_to<W: Write>(
        &self,
        kind: JobKind,
        job: &Job,
        service_id: &str,
        out: &mut W,
    ) -> Result<()> {
        let logs = self.fetch(kind, job, service_id).await?;
        writeln!(out, "-------------------------- Begin {} logs --------------------------", kind)?;
        out.write_all(logs.as_bytes())?;
        if !logs.ends_with('\n') {
            writeln!(out)?;
        }
        writeln!(out, "--------------------------- End {} logs ---------------------------", kind)?;
        Ok(())
    }

    pub async fn dump(&self, kind: JobKind, job: &Job, service_id: &str) -> Result<()> {
        let mut stdout = std::io::stdout();
        self.dump_to(kind, job, service_id, &mut stdout).await
    }
}
