//! Job lifecycle: start, look up and poll backup/restore jobs.

pub mod logs;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::models::Job;
use crate::api::ApiClient;
use crate::config::TransferConfig;
use crate::utils::errors::{Result, TransferError};

/// Body of a restore request.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreRequest {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Body of an import request.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRequest {
    pub filename: String,
    #[serde(rename = "encryptionKey")]
    pub encryption_key: String,
    #[serde(rename = "encryptionIV")]
    pub encryption_iv: String,
    #[serde(rename = "dropDatabase")]
    pub drop_database: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(rename = "databaseCollection", skip_serializing_if = "Option::is_none")]
    pub database_collection: Option<String>,
}

#[derive(Clone)]
pub struct JobClient {
    api: ApiClient,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
}

impl JobClient {
    pub fn new(api: ApiClient, transfer: &TransferConfig) -> Self {
        Self {
            api,
            poll_interval: transfer.poll_interval(),
            poll_timeout: transfer.poll_timeout(),
        }
    }

    pub async fn retrieve(&self, job_id: &str, service_id: &str) -> Result<Job> {
        let path = self
            .api
            .service_path(service_id, &format!("/jobs/{}", job_id));
        self.api.get(&path).await
    }

    pub async fn start_backup(&self, service_id: &str) -> Result<Job> {
        let path = self.api.service_path(service_id, "/backup");
        self.api.post_empty(&path).await
    }

    pub async fn start_restore(&self, service_id: &str, request: &RestoreRequest) -> Result<Job> {
        let path = self.api.service_path(service_id, "/restore");
        self.api.post(&path, request).await
    }

    pub async fn start_import(&self, service_id: &str, request: &ImportRequest) -> Result<Job> {
        let path = self.api.service_path(service_id, "/import");
        self.api.post(&path, request).await
    }

    /// One page of backups, oldest first.
    ///
    /// The backend answers either with a list of jobs or with an object keyed
    /// by job id; both are accepted.
    pub async fn list_backups(&self, service_id: &str, page: u32, page_size: u32) -> Result<Vec<Job>> {
        let page = page.to_string();
        let page_size = page_size.to_string();
        let value: Value = self
            .api
            .get_query(
                &self.api.service_path(service_id, "/backup"),
                &[("pageNumber", page.as_str()), ("pageSize", page_size.as_str())],
            )
            .await?;

        let mut jobs: Vec<Job> = match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(id, job)| {
                    serde_json::from_value::<Job>(job).map(|mut job| {
                        job.id = id;
                        job
                    })
                })
                .collect::<std::result::Result<_, _>>()?,
            other => serde_json::from_value(other)?,
        };
        jobs.sort_by(|a, b| {
            a.created_at_time()
                .cmp(&b.created_at_time())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    /// Wait until the backend stops answering 404 for a freshly started job.
    pub async fn wait_to_appear(&self, job_id: &str, service_id: &str) -> Result<Job> {
        let started = Instant::now();
        loop {
            match self.retrieve(job_id, service_id).await {
                Ok(job) => return Ok(job),
                Err(e) if e.is_not_found() => {
                    debug!("Job {} not visible yet", job_id);
                }
                Err(e) => return Err(e),
            }
            self.check_timeout(job_id, started)?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll while the job is in progress; returns the job in its final state.
    ///
    /// Any status outside the in-progress set ends polling, whether or not it
    /// is a success.
    pub async fn poll_till_finished(&self, job_id: &str, service_id: &str) -> Result<Job> {
        let started = Instant::now();
        loop {
            let job = self.retrieve(job_id, service_id).await?;
            if !job.status.is_in_progress() {
                info!("Job {} ended in status '{}'", job_id, job.status);
                return Ok(job);
            }
            debug!("Job {} is {}", job_id, job.status);
            self.check_timeout(job_id, started)?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn check_timeout(&self, job_id: &str, started: Instant) -> Result<()> {
        match self.poll_timeout {
            Some(limit) if started.elapsed() >= limit => Err(TransferError::PollTimeout {
                job_id: job_id.to_string(),
                secs: limit.as_secs(),
            }),
            _ => Ok(()),
        }
    }
}
