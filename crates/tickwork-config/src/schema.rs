//! Configuration schema definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Identity used on the coordination channel and for leases.
    /// A random id is generated when unset.
    #[serde(default)]
    pub instance_id: Option<String>,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    #[serde(default = "default_job_expiration_days")]
    pub job_expiration_days: u32,

    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    #[serde(default = "default_lease_grace_secs")]
    pub lease_grace_secs: u64,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl SchedulerSection {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn lease_grace(&self) -> Duration {
        Duration::from_secs(self.lease_grace_secs)
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            instance_id: None,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_max_retries: default_max_retries(),
            job_expiration_days: default_job_expiration_days(),
            check_interval_secs: default_check_interval_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            lease_grace_secs: default_lease_grace_secs(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_job_expiration_days() -> u32 {
    30
}

fn default_check_interval_secs() -> u64 {
    10
}

fn default_execution_timeout_secs() -> u64 {
    30
}

fn default_lease_grace_secs() -> u64 {
    30
}

fn default_max_payload_bytes() -> usize {
    5 * 1024 * 1024
}

/// `[rate_limits]` section. Values are operations per minute; `0` disables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_create_job_rate")]
    pub create_job: u32,

    #[serde(default = "default_trigger_job_rate")]
    pub trigger_job: u32,
}

impl RateLimitsConfig {
    pub fn create_job_per_minute(&self) -> Option<u32> {
        (self.create_job > 0).then_some(self.create_job)
    }

    pub fn trigger_job_per_minute(&self) -> Option<u32> {
        (self.trigger_job > 0).then_some(self.trigger_job)
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            create_job: default_create_job_rate(),
            trigger_job: default_trigger_job_rate(),
        }
    }
}

fn default_create_job_rate() -> u32 {
    60
}

fn default_trigger_job_rate() -> u32 {
    30
}

/// Job store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
    Sqlite,
}

impl StoreBackend {
    pub fn requires_path(&self) -> bool {
        !matches!(self, StoreBackend::Memory)
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Directory for `file`, database file for `sqlite`. `~` is expanded.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    /// Write a daily-rolling log file in addition to the console.
    #[serde(default)]
    pub file: bool,

    /// Log directory. Defaults to `~/.tickwork/logs`.
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: false,
            directory: None,
            max_log_files: default_max_log_files(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    7
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
