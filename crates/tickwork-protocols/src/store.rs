//! Job store protocol.
//!
//! A store is the single source of truth shared by every scheduler instance
//! pointed at it. All mutations refresh `updated_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{Job, JobPatch, JobStatus, NewJob};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn list(&self) -> Result<Vec<Job>, StoreError>;

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Persist a new job, assigning a fresh UUID and timestamps.
    async fn create(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Apply a partial update. `Ok(None)` when the id is unknown.
    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError>;

    /// `Ok(false)` when the id is unknown.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Delete terminal jobs whose `updated_at` is older than `older_than_days`.
    /// Returns the number removed.
    async fn delete_expired(&self, older_than_days: u32) -> Result<u64, StoreError>;

    /// Conditional `Scheduled -> Running` transition.
    ///
    /// Sets `last_run = now` and the lease. Returns `Ok(None)` if the job is
    /// missing, no longer `Scheduled` or not yet due at `now`; at most one
    /// concurrent caller wins.
    async fn claim(
        &self,
        id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Return `Running` jobs whose lease lapsed (or is missing) to `Scheduled`
    /// with `next_run = now`. Returns the recovered jobs.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;
}
