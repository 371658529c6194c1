//! Database commands: backup, download, export, import, restore, list and logs.
//!
//! Each `cmd_*` resolves the service by label, drives the remote job through
//! [`JobClient`] and moves the payload with the transfer managers.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::api::models::{Job, JobKind, Service};
use crate::api::services::ServiceDirectory;
use crate::api::ApiClient;
use crate::config::Config;
use crate::crypto::{calculate_total_size, CipherMaterial, EncryptReader};
use crate::jobs::logs::JobLogs;
use crate::jobs::{ImportRequest, JobClient, RestoreRequest};
use crate::prompts::Prompts;
use crate::transfer::{DownloadManager, UploadMode};
use crate::utils::errors::{Result, TransferError};

/// Optional settings of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Target database (mongo)
    pub database: Option<String>,
    /// Target collection (mongo)
    pub collection: Option<String>,
    /// Import without taking a backup first; asks for confirmation instead.
    pub skip_backup: bool,
}

pub struct Db {
    config: Config,
    api: ApiClient,
    services: ServiceDirectory,
    jobs: JobClient,
    logs: JobLogs,
    downloads: DownloadManager,
    prompts: Arc<dyn Prompts>,
}

impl Db {
    pub fn new(config: Config, prompts: Arc<dyn Prompts>) -> Result<Self> {
        let api = ApiClient::new(&config)?;
        Ok(Self {
            services: ServiceDirectory::new(api.clone()),
            jobs: JobClient::new(api.clone(), &config.transfer),
            logs: JobLogs::new(api.clone()),
            downloads: DownloadManager::new(api.clone(), config.progress.clone()),
            api,
            config,
            prompts,
        })
    }

    async fn service(&self, label: &str) -> Result<Service> {
        self.services
            .retrieve_by_label(label)
            .await?
            .ok_or_else(|| TransferError::ServiceNotFound(label.to_string()))
    }

    /// Start a backup and follow it to its final status.
    async fn backup_until_done(&self, service: &Service, label: &str) -> Result<Job> {
        let job = self.jobs.start_backup(&service.id).await?;
        info!("Backup started (job ID = {})", job.id);
        info!("Polling until backup finishes.");
        if job.is_snapshot() {
            info!(
                "This is a snapshot backup, it may be a while before this backup shows up in the \"db-transfer list {}\" command.",
                label
            );
            self.jobs.wait_to_appear(&job.id, &service.id).await?;
        }
        let polled = self.jobs.poll_till_finished(&job.id, &service.id).await?;
        let job = settle(job, polled);
        info!("Ended in status '{}'", job.status);
        Ok(job)
    }

    /// Print the logs of a job that stopped polling and fail unless it finished.
    ///
    /// A failed job's status outranks a failure to fetch its logs.
    async fn conclude(&self, kind: JobKind, job: &Job, service_id: &str) -> Result<()> {
        if job.status.is_finished() {
            return self.logs.dump(kind, job, service_id).await;
        }
        Err(self.failure_with_logs(kind, job, service_id).await)
    }

    async fn failure_with_logs(&self, kind: JobKind, job: &Job, service_id: &str) -> TransferError {
        if let Err(e) = self.logs.dump(kind, job, service_id).await {
            warn!("Failed to retrieve logs of job {}: {}", job.id, e);
        }
        job_failed(job)
    }

    pub async fn cmd_backup(&self, label: &str, skip_poll: bool) -> Result<Job> {
        let service = self.service(label).await?;
        if skip_poll {
            let job = self.jobs.start_backup(&service.id).await?;
            info!("Backup started (job ID = {})", job.id);
            return Ok(job);
        }
        let job = self.backup_until_done(&service, label).await?;
        self.conclude(JobKind::Backup, &job, &service.id).await?;
        Ok(job)
    }

    /// Stream an existing backup to `path`. Returns the encrypted bytes received.
    pub async fn cmd_download(
        &self,
        label: &str,
        backup_id: &str,
        path: &Path,
        force: bool,
    ) -> Result<u64> {
        self.prompts.phi()?;
        prepare_destination(path, force).await?;
        let service = self.service(label).await?;

        let job = self.jobs.retrieve(backup_id, &service.id).await?;
        if job.kind != Some(JobKind::Backup) || !job.status.is_downloadable() {
            return Err(TransferError::InvalidJob(
                "Only 'finished' 'backup' jobs may be downloaded".to_string(),
            ));
        }
        let material = payload_material(&job, JobKind::Backup)?;

        info!("Downloading backup {}", backup_id);
        let received = self
            .downloads
            .download(&job.id, &service.id, &material, path)
            .await?;
        info!("{} backup downloaded successfully to {}", label, path.display());
        info!(
            "You can also view logs for this backup with the \"db-transfer logs {} {}\" command",
            label, backup_id
        );
        Ok(received)
    }

    /// Take a fresh backup and stream it to `path`.
    pub async fn cmd_export(&self, label: &str, path: &Path, force: bool) -> Result<u64> {
        self.prompts.phi()?;
        prepare_destination(path, force).await?;
        let service = self.service(label).await?;

        let job = self.backup_until_done(&service, label).await?;
        if !job.status.is_finished() {
            return Err(self.failure_with_logs(JobKind::Backup, &job, &service.id).await);
        }

        let material = payload_material(&job, JobKind::Backup)?;
        let received = self
            .downloads
            .download(&job.id, &service.id, &material, path)
            .await?;
        self.logs.dump(JobKind::Backup, &job, &service.id).await?;
        info!("{} exported successfully to {}", service.name, path.display());
        Ok(received)
    }

    /// Encrypt and upload `path`, then have the backend import it.
    pub async fn cmd_import(&self, label: &str, path: &Path, options: &ImportOptions) -> Result<Job> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a regular file", path.display()),
            )));
        }
        let upload_size = calculate_total_size(metadata.len());
        UploadMode::Multipart.check_size(path, upload_size)?;

        let mode = UploadMode::probe(&self.api).await?;
        mode.check_size(path, upload_size)?;

        let service = self.service(label).await?;
        if service.name == "postgresql" {
            warn!("Import cannot DROP DATABASE \"catalyzeDB\". Ensure your import individually removes any necessary \"catalyzeDB\" objects, or import only into newly created postgres services where the \"catalyzeDB\" database is already empty.");
        }

        let material = CipherMaterial::generate();
        let file = tokio::fs::File::open(path).await?;
        let source = EncryptReader::new(file, &material);

        if options.skip_backup {
            self.prompts.yes_no(
                "",
                "Are you sure you want to import data into your database without backing it up first?",
            )?;
        } else {
            info!("Backing up \"{}\" before performing the import", label);
            let backup = self.backup_until_done(&service, label).await?;
            self.conclude(JobKind::Backup, &backup, &service.id).await?;
        }

        info!("Importing '{}' into {} (ID = {})", path.display(), label, service.id);
        let uploader = mode.uploader(
            self.api.clone(),
            &service.id,
            &self.config.transfer,
            &self.config.progress,
        );
        let filename = uploader.upload(Box::new(source), upload_size).await?;

        let request = ImportRequest {
            filename,
            encryption_key: material.key_hex(),
            encryption_iv: material.iv_hex(),
            drop_database: false,
            database: options.database.clone(),
            database_collection: options.collection.clone(),
        };
        let job = self.jobs.start_import(&service.id, &request).await?;
        info!("Processing import (job ID = {}).", job.id);

        let polled = self.jobs.poll_till_finished(&job.id, &service.id).await?;
        let job = settle(job, polled);
        info!("Import complete (end status = '{}')", job.status);
        self.conclude(JobKind::Restore, &job, &service.id).await?;
        Ok(job)
    }

    /// Restore an existing backup in place.
    pub async fn cmd_restore(
        &self,
        label: &str,
        backup_id: &str,
        database: Option<String>,
        skip_confirm: bool,
    ) -> Result<Job> {
        if !skip_confirm {
            self.prompts.yes_no(
                "A database restore will be performed immediately. All current data will be lost if not included in the specified backup. No backup will be taken beforehand - please do so now if you need to.",
                "Do you wish to proceed?",
            )?;
        }
        let service = self.service(label).await?;

        let source = self.jobs.retrieve(backup_id, &service.id).await?;
        if source.kind != Some(JobKind::Backup) || !source.status.is_finished() {
            return Err(TransferError::InvalidJob(
                "Only 'finished' 'backup' jobs may be restored".to_string(),
            ));
        }

        let request = RestoreRequest {
            job_id: backup_id.to_string(),
            database,
        };
        let job = self.jobs.start_restore(&service.id, &request).await?;
        let polled = self.jobs.poll_till_finished(&job.id, &service.id).await?;
        let job = settle(job, polled);
        info!("Ended in status '{}'", job.status);
        self.conclude(JobKind::Restore, &job, &service.id).await?;
        info!("Backup {} restored to {}", backup_id, label);
        Ok(job)
    }

    pub async fn cmd_list(&self, label: &str, page: u32, page_size: u32) -> Result<Vec<Job>> {
        let service = self.service(label).await?;
        self.jobs.list_backups(&service.id, page, page_size).await
    }

    pub async fn cmd_logs(&self, label: &str, job_id: &str) -> Result<()> {
        let service = self.service(label).await?;
        let job = self.jobs.retrieve(job_id, &service.id).await?;
        let kind = match job.kind {
            Some(kind @ (JobKind::Backup | JobKind::Restore)) => kind,
            _ => {
                return Err(TransferError::InvalidJob(format!(
                    "Job {} is neither a backup nor a restore",
                    job_id
                )))
            }
        };
        self.logs.dump(kind, &job, &service.id).await
    }
}

/// Render a page of backups for the terminal.
pub fn render_backups(jobs: &[Job], page_size: u32) -> String {
    if jobs.is_empty() {
        return "No backups created yet for this service.\n".to_string();
    }
    let mut out = String::new();
    for job in jobs {
        out.push_str(&format!(
            "{} {} (status = {})\n",
            job.id,
            job.created_at.as_deref().unwrap_or("-"),
            job.status
        ));
    }
    if jobs.len() as u32 >= page_size {
        out.push_str("(for older backups, try with --page 2 or adjust --page-size)\n");
    }
    out
}

/// The started job with the status it ended in. Key material only comes
/// from the polled copy when the start response lacked it.
fn settle(mut started: Job, polled: Job) -> Job {
    started.status = polled.status;
    if started.backup.is_none() {
        started.backup = polled.backup;
    }
    if started.restore.is_none() {
        started.restore = polled.restore;
    }
    started
}

fn job_failed(job: &Job) -> TransferError {
    TransferError::JobFailed {
        job_id: job.id.clone(),
        status: job.status.to_string(),
    }
}

fn payload_material(job: &Job, kind: JobKind) -> Result<CipherMaterial> {
    let record = job.cipher_record(kind).ok_or_else(|| {
        TransferError::InvalidJob(format!("Job {} carries no {} key material", job.id, kind))
    })?;
    CipherMaterial::from_record(record)
}

/// Refuse to clobber `path` unless forced; when forced, remove what is there.
async fn prepare_destination(path: &Path, force: bool) -> Result<()> {
    let exists = tokio::fs::try_exists(path).await?;
    if !exists {
        return Ok(());
    }
    if !force {
        return Err(TransferError::FileExists(path.to_path_buf()));
    }
    tokio::fs::remove_file(path).await?;
    Ok(())
}
