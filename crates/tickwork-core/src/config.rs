//! Scheduler configuration.

use std::time::Duration;

/// Runtime settings for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identity on the coordination channel and in leases.
    /// `None` picks a random UUID.
    pub instance_id: Option<String>,

    /// Ceiling on locally reserved executions.
    pub max_concurrent_jobs: usize,

    /// Used when a job is created without `max_retries`.
    pub default_max_retries: u32,

    /// Terminal jobs untouched for this long are removed at start.
    pub job_expiration_days: u32,

    pub check_interval: Duration,

    pub execution_timeout: Duration,

    /// `None` disables the limit.
    pub create_job_rate_per_minute: Option<u32>,

    /// `None` disables the limit.
    pub trigger_job_rate_per_minute: Option<u32>,

    /// Added to the execution timeout to form a claim's lease.
    pub lease_grace: Duration,

    /// Upper bound on the JSON encoding of a task payload.
    pub max_payload_bytes: usize,
}

impl SchedulerConfig {
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Disable both admission limits.
    pub fn without_rate_limits(mut self) -> Self {
        self.create_job_rate_per_minute = None;
        self.trigger_job_rate_per_minute = None;
        self
    }

    /// Lease length for a claim made now.
    pub fn lease_duration(&self) -> Duration {
        self.execution_timeout + self.lease_grace
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            max_concurrent_jobs: 5,
            default_max_retries: 3,
            job_expiration_days: 30,
            check_interval: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(30),
            create_job_rate_per_minute: Some(60),
            trigger_job_rate_per_minute: Some(30),
            lease_grace: Duration::from_secs(30),
            max_payload_bytes: 5 * 1024 * 1024,
        }
    }
}
