//! Configuration management for the transfer client.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! The resulting [`Config`] is passed explicitly into every component; nothing
//! reads process-wide settings after startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::errors::{Result, TransferError};

/// Prefix for environment overrides, e.g. `DB_TRANSFER_SESSION_TOKEN`.
const ENV_PREFIX: &str = "DB_TRANSFER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the job backend, e.g. `https://paas-api.example.com`
    pub host: String,

    /// Path prefix appended to the host, e.g. `/v1`
    #[serde(default)]
    pub host_version: String,

    /// Environment the services live in
    pub environment_id: String,

    /// Session token sent with every API request
    #[serde(default)]
    pub session_token: String,

    /// Pod the environment is deployed to
    #[serde(default)]
    pub pod: Option<String>,

    #[serde(default)]
    pub users_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Attempts per multipart chunk PUT
    #[serde(default = "default_attempts")]
    pub chunk_attempts: u32,

    /// Delay between chunk PUT attempts (seconds)
    #[serde(default = "default_chunk_retry_delay_secs")]
    pub chunk_retry_delay_secs: u64,

    /// Attempts to initiate a multipart session
    #[serde(default = "default_attempts")]
    pub initiate_attempts: u32,

    /// Attempts to complete a multipart session
    #[serde(default = "default_attempts")]
    pub complete_attempts: u32,

    /// Interval between job status polls (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up polling a job after this many seconds (unbounded when unset)
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Render the overwriting status line
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sampling interval (milliseconds)
    #[serde(default = "default_progress_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_attempts() -> u32 {
    5
}

fn default_chunk_retry_delay_secs() -> u64 {
    15
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_attempts: default_attempts(),
            chunk_retry_delay_secs: default_chunk_retry_delay_secs(),
            initiate_attempts: default_attempts(),
            complete_attempts: default_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: None,
        }
    }
}

impl TransferConfig {
    pub fn chunk_retry_delay(&self) -> Duration {
        Duration::from_secs(self.chunk_retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_progress_interval_ms(),
        }
    }
}

impl ProgressConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Build configuration purely from the environment (and a `.env` file).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Config {
            api: ApiConfig {
                host: String::new(),
                host_version: String::new(),
                environment_id: String::new(),
                session_token: String::new(),
                pod: None,
                users_id: None,
            },
            transfer: TransferConfig::default(),
            progress: ProgressConfig::default(),
            log: LogConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TransferError::Config(e.to_string()))
    }

    /// Override fields from `DB_TRANSFER_*` variables.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_var("HOST") {
            self.api.host = v;
        }
        if let Some(v) = env_var("HOST_VERSION") {
            self.api.host_version = v;
        }
        if let Some(v) = env_var("ENVIRONMENT_ID") {
            self.api.environment_id = v;
        }
        if let Some(v) = env_var("SESSION_TOKEN") {
            self.api.session_token = v;
        }
        if let Some(v) = env_var("POD") {
            self.api.pod = Some(v);
        }
        if let Some(v) = env_var("USERS_ID") {
            self.api.users_id = Some(v);
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = env_var("POLL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.transfer.poll_timeout_secs = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.host.is_empty() {
            return Err(TransferError::Config("api.host is not set".to_string()));
        }
        if self.api.environment_id.is_empty() {
            return Err(TransferError::Config(
                "api.environment_id is not set".to_string(),
            ));
        }
        if self.transfer.chunk_attempts == 0
            || self.transfer.initiate_attempts == 0
            || self.transfer.complete_attempts == 0
        {
            return Err(TransferError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `{host}{host_version}` with no trailing slash.
    pub fn base_url(&self) -> String {
        format!(
            "{}{}",
            self.api.host.trim_end_matches('/'),
            self.api.host_version.trim_end_matches('/')
        )
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.is_empty())
}
