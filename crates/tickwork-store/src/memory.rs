//! In-memory job store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use tickwork_protocols::{
    Clock, Job, JobPatch, JobStatus, JobStore, NewJob, StoreError, SystemClock,
};

use crate::common::{
    claim_patch, expiry_cutoff, is_expired, new_job_id, reap_patch, sort_by_creation,
};

/// Job store backed by a `HashMap`. Contents are lost on drop.
///
/// Clones of the `Arc` share one map, so several schedulers in one process
/// can coordinate through it.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` for `created_at`/`updated_at` and expiry cutoffs.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Insert a fully-formed record, replacing any job with the same id.
    ///
    /// Bypasses `updated_at` bookkeeping; used to seed fixtures.
    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn filtered(&self, predicate: impl Fn(&Job) -> bool) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<Job> = jobs.values().filter(|j| predicate(j)).cloned().collect();
        sort_by_creation(&mut out);
        out
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.filtered(|_| true).await)
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self.filtered(|j| j.has_tag(tag)).await)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        Ok(self.filtered(|j| j.status == status).await)
    }

    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let job = Job::from_new(new_job_id(), job, self.clock.now());
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, "Created job");
        Ok(job)
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };
        patch.apply(job, self.clock.now());
        Ok(Some(job.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }

    async fn delete_expired(&self, older_than_days: u32) -> Result<u64, StoreError> {
        let cutoff = expiry_cutoff(self.clock.now(), older_than_days);
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !is_expired(job, cutoff));
        let removed = (before - jobs.len()) as u64;
        if removed > 0 {
            debug!(removed, "Deleted expired jobs");
        }
        Ok(removed)
    }

    async fn claim(
        &self,
        id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };
        if !job.is_due(now) {
            return Ok(None);
        }
        claim_patch(owner, now, lease_until).apply(job, self.clock.now());
        Ok(Some(job.clone()))
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let stamp = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let mut reaped = Vec::new();
        for job in jobs.values_mut().filter(|j| j.lease_expired(now)) {
            reap_patch(now).apply(job, stamp);
            reaped.push(job.clone());
        }
        sort_by_creation(&mut reaped);
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tickwork_protocols::{ManualClock, TaskPayload};

    fn new_job(name: &str, tags: &[&str]) -> NewJob {
        NewJob {
            name: name.to_string(),
            schedule: "* * * * *".to_string(),
            task: TaskPayload::new("log", json!({})),
            status: JobStatus::Scheduled,
            next_run: Some(start() - Duration::hours(1)),
            max_retries: 3,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let store = MemoryJobStore::new();
        let a = store.create(new_job("a", &[])).await.unwrap();
        let b = store.create(new_job("b", &[])).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_refreshes_updated_at() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = MemoryJobStore::with_clock(clock.clone());
        let job = store.create(new_job("a", &[])).await.unwrap();

        clock.advance(Duration::seconds(5));
        let updated = store
            .update(&job.id, JobPatch::new().name("renamed"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.updated_at, start() + Duration::seconds(5));
        assert_eq!(updated.created_at, start());
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = MemoryJobStore::new();
        let result = store.update("missing", JobPatch::new().name("x")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_claim_only_wins_once() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("a", &[])).await.unwrap();
        let now = Utc::now();
        let until = now + Duration::seconds(60);

        let first = store.claim(&job.id, "i1", now, until).await.unwrap();
        let second = store.claim(&job.id, "i2", now, until).await.unwrap();

        let claimed = first.unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.last_run, Some(now));
        assert_eq!(claimed.lease.unwrap().owner, "i1");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_claim_requires_due_job() {
        let store = MemoryJobStore::new();
        let mut later = new_job("later", &[]);
        later.next_run = Some(start() + Duration::minutes(10));
        let job = store.create(later).await.unwrap();

        let until = start() + Duration::minutes(1);
        assert!(store.claim(&job.id, "i1", start(), until).await.unwrap().is_none());
        let claimed = store
            .claim(&job.id, "i1", start() + Duration::minutes(10), until)
            .await
            .unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn test_reap_expired_leases() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("a", &[])).await.unwrap();
        let t0 = start();
        store
            .claim(&job.id, "i1", t0, t0 + Duration::seconds(60))
            .await
            .unwrap();

        assert!(store.reap_expired_leases(t0 + Duration::seconds(30)).await.unwrap().is_empty());

        let later = t0 + Duration::seconds(61);
        let reaped = store.reap_expired_leases(later).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].status, JobStatus::Scheduled);
        assert_eq!(reaped[0].next_run, Some(later));
        assert!(reaped[0].lease.is_none());
    }

    #[tokio::test]
    async fn test_list_by_tag_and_status() {
        let store = MemoryJobStore::new();
        let a = store.create(new_job("a", &["ops"])).await.unwrap();
        store.create(new_job("b", &["dev"])).await.unwrap();
        store
            .update(&a.id, JobPatch::new().status(JobStatus::Paused))
            .await
            .unwrap();

        let ops = store.list_by_tag("ops").await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name, "a");

        let paused = store.list_by_status(JobStatus::Paused).await.unwrap();
        assert_eq!(paused.len(), 1);
        let scheduled = store.list_by_status(JobStatus::Scheduled).await.unwrap();
        assert_eq!(scheduled[0].name, "b");
    }

    #[tokio::test]
    async fn test_delete_expired_only_terminal() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = MemoryJobStore::with_clock(clock.clone());
        let done = store.create(new_job("done", &[])).await.unwrap();
        let failed = store.create(new_job("failed", &[])).await.unwrap();
        store.create(new_job("active", &[])).await.unwrap();
        store
            .update(&done.id, JobPatch::new().status(JobStatus::Completed))
            .await
            .unwrap();
        store
            .update(&failed.id, JobPatch::new().status(JobStatus::Failed))
            .await
            .unwrap();

        clock.advance(Duration::days(10));
        assert_eq!(store.delete_expired(30).await.unwrap(), 0);

        clock.advance(Duration::days(25));
        assert_eq!(store.delete_expired(30).await.unwrap(), 2);
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "active");
    }

    #[tokio::test]
    async fn test_delete_expired_with_huge_window_keeps_everything() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = MemoryJobStore::with_clock(clock.clone());
        let done = store.create(new_job("done", &[])).await.unwrap();
        store
            .update(&done.id, JobPatch::new().status(JobStatus::Completed))
            .await
            .unwrap();

        clock.advance(Duration::days(365));
        assert_eq!(store.delete_expired(u32::MAX).await.unwrap(), 0);
        assert!(store.get(&done.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("a", &[])).await.unwrap();
        assert!(store.delete(&job.id).await.unwrap());
        assert!(!store.delete(&job.id).await.unwrap());
        assert!(store.get(&job.id).await.unwrap().is_none());
    }
}
