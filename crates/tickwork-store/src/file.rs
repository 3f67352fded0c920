//! File system job store.
//!
//! Jobs are stored as individual JSON files:
//! ```text
//! {storage_path}/
//! └── jobs/
//!     └── {uuid}.json
//! ```
//!
//! Writes go to a temporary file that is then renamed over the target.
//! Conditional transitions (`claim`, `reap_expired_leases`) are serialized
//! within one process only; share a [`SqliteJobStore`](crate::SqliteJobStore)
//! between processes instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tickwork_protocols::{
    Clock, Job, JobPatch, JobStatus, JobStore, NewJob, StoreError, SystemClock,
};

use crate::common::{
    claim_patch, expiry_cutoff, is_expired, new_job_id, reap_patch, sort_by_creation,
};

pub struct FileJobStore {
    storage_path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `storage_path`.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_clock(storage_path, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        storage_path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        fs::create_dir_all(storage_path.join("jobs")).await?;
        debug!("FileJobStore initialized at {:?}", storage_path);
        Ok(Self {
            storage_path,
            write_lock: Mutex::new(()),
            clock,
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn jobs_dir(&self) -> PathBuf {
        self.storage_path.join("jobs")
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.jobs_dir().join(format!("{}.json", id))
    }

    /// Ids become file names; reject anything that could escape the directory.
    fn is_safe_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    async fn read_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        if !Self::is_safe_id(id) {
            return Ok(None);
        }
        let path = self.job_path(id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let job = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(job))
    }

    async fn write_job(&self, job: &Job) -> Result<(), StoreError> {
        let path = self.job_path(&job.id);
        let tmp = self.jobs_dir().join(format!(".{}.json.tmp", job.id));
        let content = serde_json::to_string_pretty(job)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Every readable job. Unreadable files are logged and skipped.
    async fn read_all(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(self.jobs_dir()).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if !is_json || is_tmp {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Job>(&content) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!("Failed to deserialize job from {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read job file {:?}: {}", path, e),
            }
        }

        sort_by_creation(&mut jobs);
        Ok(jobs)
    }

    async fn filtered(&self, predicate: impl Fn(&Job) -> bool) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|j| predicate(j))
            .collect())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.read_job(id).await
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.read_all().await
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError> {
        self.filtered(|j| j.has_tag(tag)).await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.filtered(|j| j.status == status).await
    }

    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let job = Job::from_new(new_job_id(), job, self.clock.now());
        let _guard = self.write_lock.lock().await;
        self.write_job(&job).await?;
        debug!(job_id = %job.id, "Created job");
        Ok(job)
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut job) = self.read_job(id).await? else {
            return Ok(None);
        };
        patch.apply(&mut job, self.clock.now());
        self.write_job(&job).await?;
        Ok(Some(job))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if !Self::is_safe_id(id) {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.job_path(id)).await {
            Ok(()) => {
                debug!(job_id = %id, "Deleted job");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_expired(&self, older_than_days: u32) -> Result<u64, StoreError> {
        let cutoff = expiry_cutoff(self.clock.now(), older_than_days);
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for job in self.read_all().await? {
            if is_expired(&job, cutoff) {
                match fs::remove_file(self.job_path(&job.id)).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
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
        let _guard = self.write_lock.lock().await;
        let Some(mut job) = self.read_job(id).await? else {
            return Ok(None);
        };
        if !job.is_due(now) {
            return Ok(None);
        }
        claim_patch(owner, now, lease_until).apply(&mut job, self.clock.now());
        self.write_job(&job).await?;
        Ok(Some(job))
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let stamp = self.clock.now();
        let mut reaped = Vec::new();
        for mut job in self.read_all().await? {
            if job.lease_expired(now) {
                reap_patch(now).apply(&mut job, stamp);
                self.write_job(&job).await?;
                reaped.push(job);
            }
        }
        Ok(reaped)
    }
}
