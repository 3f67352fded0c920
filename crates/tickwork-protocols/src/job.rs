//! Job definition, status and the write-side inputs used by stores.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next fire time.
    Scheduled,
    /// Claimed by an instance and executing.
    Running,
    /// Finished for good.
    Completed,
    /// Exhausted its retries or hit an unexpected error.
    Failed,
    /// Suspended by a caller.
    Paused,
    /// Withdrawn.
    Canceled,
}

impl JobStatus {
    /// All statuses, in declaration order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Paused,
        JobStatus::Canceled,
    ];

    /// Stable lowercase name, used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Terminal statuses are eligible for retention cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "paused" => Ok(JobStatus::Paused),
            "canceled" | "cancelled" => Ok(JobStatus::Canceled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// The unit of work a job performs: a handler type plus opaque data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Task type, used to look up the handler.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Handler-specific data.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TaskPayload {
    pub fn new(task_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            data,
        }
    }
}

/// A claim held by one scheduler instance on a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLease {
    /// Instance id of the claimant.
    pub owner: String,
    /// When the claim lapses.
    pub expires_at: DateTime<Utc>,
}

/// A recurring job as persisted by a [`JobStore`](crate::JobStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Cron expression.
    pub schedule: String,
    pub task: TaskPayload,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success.
    pub retry_attempts: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Present only while `status == Running`.
    #[serde(default)]
    pub lease: Option<JobLease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Materialize a new record. Stores call this from `create`.
    pub fn from_new(id: impl Into<String>, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: new.name,
            schedule: new.schedule,
            task: new.task,
            status: new.status,
            last_run: None,
            next_run: new.next_run,
            retry_attempts: 0,
            max_retries: new.max_retries,
            tags: new.tags,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Scheduled with a fire time at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.next_run.is_some_and(|next| next <= now)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Running with no lease, or with a lease that lapsed at or before `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self.lease.as_ref().is_none_or(|lease| lease.expires_at <= now)
    }
}

/// Fields supplied to [`JobStore::create`](crate::JobStore::create).
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub schedule: String,
    pub task: TaskPayload,
    pub status: JobStatus,
    pub next_run: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub tags: Vec<String>,
}

/// Caller input for creating or updating a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub name: String,
    pub schedule: String,
    pub task: TaskPayload,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl JobInput {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, task: TaskPayload) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            task,
            max_retries: None,
            tags: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// Partial update applied by [`JobStore::update`](crate::JobStore::update).
///
/// `None` leaves a field untouched. Nullable fields take `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub task: Option<TaskPayload>,
    pub status: Option<JobStatus>,
    pub last_run: Option<Option<DateTime<Utc>>>,
    pub next_run: Option<Option<DateTime<Utc>>>,
    pub retry_attempts: Option<u32>,
    pub max_retries: Option<u32>,
    pub tags: Option<Vec<String>>,
    pub lease: Option<Option<JobLease>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn task(mut self, task: TaskPayload) -> Self {
        self.task = Some(task);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn last_run(mut self, last_run: Option<DateTime<Utc>>) -> Self {
        self.last_run = Some(last_run);
        self
    }

    pub fn next_run(mut self, next_run: Option<DateTime<Utc>>) -> Self {
        self.next_run = Some(next_run);
        self
    }

    pub fn retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = Some(retry_attempts);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn lease(mut self, lease: Option<JobLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Shorthand for `lease(None)`.
    pub fn clear_lease(self) -> Self {
        self.lease(None)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to `job` and bump `updated_at`.
    pub fn apply(self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            job.name = name;
        }
        if let Some(schedule) = self.schedule {
            job.schedule = schedule;
        }
        if let Some(task) = self.task {
            job.task = task;
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(last_run) = self.last_run {
            job.last_run = last_run;
        }
        if let Some(next_run) = self.next_run {
            job.next_run = next_run;
        }
        if let Some(retry_attempts) = self.retry_attempts {
            job.retry_attempts = retry_attempts;
        }
        if let Some(max_retries) = self.max_retries {
            job.max_retries = max_retries;
        }
        if let Some(tags) = self.tags {
            job.tags = tags;
        }
        if let Some(lease) = self.lease {
            job.lease = lease;
        }
        job.updated_at = now;
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
