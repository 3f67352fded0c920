//! SQLite job store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Params, Row};
use tokio_rusqlite::Connection;
use tracing::debug;

use tickwork_protocols::{
    Clock, Job, JobLease, JobPatch, JobStatus, JobStore, NewJob, StoreError, SystemClock,
    TaskPayload,
};

use crate::common::{expiry_cutoff, new_job_id};
use crate::schema::{configure_shared, init_schema};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

const COLUMNS: &str = "id, name, schedule, task_type, task_data, status, last_run, next_run, \
     retry_attempts, max_retries, lease_owner, lease_expires_at, created_at, updated_at";

const ORDER: &str = "ORDER BY created_at, rowid";

/// SQLite-based job store.
///
/// `claim` is a single conditional `UPDATE`, so several processes may share
/// one database file.
pub struct SqliteJobStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        conn.call(|conn| init_schema(conn)).await.map_err(backend)?;
        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Open (creating if needed) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(&path).await.map_err(backend)?;
        conn.call(|conn| {
            configure_shared(conn)?;
            init_schema(conn)
        })
        .await
        .map_err(backend)?;
        debug!("SqliteJobStore opened at {:?}", path);
        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for `created_at`/`updated_at` and expiry cutoffs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn query(
        &self,
        clause: &'static str,
        arg: Option<String>,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let rows = match arg {
                    Some(arg) => load_rows(conn, clause, [arg])?,
                    None => load_rows(conn, clause, params![])?,
                };
                Ok(rows)
            })
            .await
            .map_err(backend)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| Ok(load_row(conn, &id)?))
            .await
            .map_err(backend)?;
        row.map(JobRow::into_job).transpose()
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.query("", None).await
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError> {
        self.query(
            "WHERE id IN (SELECT job_id FROM job_tags WHERE tag = ?1)",
            Some(tag.to_string()),
        )
        .await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.query("WHERE status = ?1", Some(status.as_str().to_string()))
            .await
    }

    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let job = Job::from_new(new_job_id(), job, self.clock.now());
        let record = JobRecord::from_job(&job)?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    &format!(
                        "INSERT INTO jobs ({COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                    ),
                    params![
                        record.id,
                        record.name,
                        record.schedule,
                        record.task_type,
                        record.task_data,
                        record.status,
                        record.last_run,
                        record.next_run,
                        record.retry_attempts,
                        record.max_retries,
                        record.lease_owner,
                        record.lease_expires_at,
                        record.created_at,
                        record.updated_at,
                    ],
                )?;
                replace_tags(&tx, &record.id, &record.tags)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(backend)?;
        debug!(job_id = %job.id, "Created job");
        Ok(job)
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        let id = id.to_string();
        let now = self.clock.now();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(row) = load_row(&tx, &id)? else {
                    return Ok(Ok(None));
                };
                let mut job = match row.into_job() {
                    Ok(job) => job,
                    Err(e) => return Ok(Err(e)),
                };
                patch.apply(&mut job, now);
                let record = match JobRecord::from_job(&job) {
                    Ok(record) => record,
                    Err(e) => return Ok(Err(e)),
                };
                write_record(&tx, &record)?;
                tx.commit()?;
                Ok(Ok(Some(job)))
            })
            .await
            .map_err(backend)?
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let job_id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let id = job_id;
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM job_tags WHERE job_id = ?1", [&id])?;
                let removed = tx.execute("DELETE FROM jobs WHERE id = ?1", [&id])?;
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(backend)?;
        if removed > 0 {
            debug!(job_id = %id, "Deleted job");
        }
        Ok(removed > 0)
    }

    async fn delete_expired(&self, older_than_days: u32) -> Result<u64, StoreError> {
        let cutoff = timestamp(expiry_cutoff(self.clock.now(), older_than_days));
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let expired = "status IN ('completed', 'failed', 'canceled') AND updated_at < ?1";
                tx.execute(
                    &format!(
                        "DELETE FROM job_tags WHERE job_id IN (SELECT id FROM jobs WHERE {expired})"
                    ),
                    [&cutoff],
                )?;
                let removed = tx.execute(&format!("DELETE FROM jobs WHERE {expired}"), [&cutoff])?;
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(backend)?;
        Ok(removed as u64)
    }

    async fn claim(
        &self,
        id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let id = id.to_string();
        let owner = owner.to_string();
        let last_run = timestamp(now);
        let lease_until = timestamp(lease_until);
        let stamp = timestamp(self.clock.now());
        let row = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE jobs
                     SET status = 'running', last_run = ?1, lease_owner = ?2,
                         lease_expires_at = ?3, updated_at = ?4
                     WHERE id = ?5 AND status = 'scheduled'
                       AND next_run IS NOT NULL AND next_run <= ?1",
                    params![last_run, owner, lease_until, stamp, id],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                Ok(load_row(conn, &id)?)
            })
            .await
            .map_err(backend)?;
        row.map(JobRow::into_job).transpose()
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let now = timestamp(now);
        let stamp = timestamp(self.clock.now());
        let rows = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let lapsed = "status = 'running' AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)";
                let candidates = load_rows(&tx, &format!("WHERE {lapsed}"), [&now])?;
                let mut reaped = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let changed = tx.execute(
                        &format!(
                            "UPDATE jobs
                             SET status = 'scheduled', next_run = ?1, lease_owner = NULL,
                                 lease_expires_at = NULL, updated_at = ?2
                             WHERE id = ?3 AND {lapsed}"
                        ),
                        params![now, stamp, candidate.id],
                    )?;
                    if changed > 0 {
                        if let Some(row) = load_row(&tx, &candidate.id)? {
                            reaped.push(row);
                        }
                    }
                }
                tx.commit()?;
                Ok(reaped)
            })
            .await
            .map_err(backend)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

fn backend(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Fixed-width RFC 3339, so text comparison orders instants.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: format!("bad timestamp '{}': {}", value, e),
        })
}

/// Raw row as read from SQLite.
struct JobRow {
    id: String,
    name: String,
    schedule: String,
    task_type: String,
    task_data: String,
    status: String,
    last_run: Option<String>,
    next_run: Option<String>,
    retry_attempts: i64,
    max_retries: i64,
    lease_owner: Option<String>,
    lease_expires_at: Option<String>,
    created_at: String,
    updated_at: String,
    tags: Vec<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            schedule: row.get(2)?,
            task_type: row.get(3)?,
            task_data: row.get(4)?,
            status: row.get(5)?,
            last_run: row.get(6)?,
            next_run: row.get(7)?,
            retry_attempts: row.get(8)?,
            max_retries: row.get(9)?,
            lease_owner: row.get(10)?,
            lease_expires_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            tags: Vec::new(),
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let id = self.id;
        let corrupt = |message: String| StoreError::Corrupt {
            id: id.clone(),
            message,
        };

        let status = self.status.parse::<JobStatus>().map_err(&corrupt)?;
        let data = serde_json::from_str(&self.task_data)
            .map_err(|e| corrupt(format!("bad task data: {}", e)))?;
        let retry_attempts = u32::try_from(self.retry_attempts)
            .map_err(|e| corrupt(format!("bad retry_attempts: {}", e)))?;
        let max_retries = u32::try_from(self.max_retries)
            .map_err(|e| corrupt(format!("bad max_retries: {}", e)))?;
        let last_run = self
            .last_run
            .as_deref()
            .map(|v| parse_timestamp(&id, v))
            .transpose()?;
        let next_run = self
            .next_run
            .as_deref()
            .map(|v| parse_timestamp(&id, v))
            .transpose()?;
        let lease = match (self.lease_owner, self.lease_expires_at) {
            (Some(owner), Some(expires_at)) => Some(JobLease {
                owner,
                expires_at: parse_timestamp(&id, &expires_at)?,
            }),
            _ => None,
        };
        let created_at = parse_timestamp(&id, &self.created_at)?;
        let updated_at = parse_timestamp(&id, &self.updated_at)?;

        Ok(Job {
            id,
            name: self.name,
            schedule: self.schedule,
            task: TaskPayload {
                task_type: self.task_type,
                data,
            },
            status,
            last_run,
            next_run,
            retry_attempts,
            max_retries,
            tags: self.tags,
            lease,
            created_at,
            updated_at,
        })
    }
}

/// Column values ready to bind.
struct JobRecord {
    id: String,
    name: String,
    schedule: String,
    task_type: String,
    task_data: String,
    status: &'static str,
    last_run: Option<String>,
    next_run: Option<String>,
    retry_attempts: i64,
    max_retries: i64,
    lease_owner: Option<String>,
    lease_expires_at: Option<String>,
    created_at: String,
    updated_at: String,
    tags: Vec<String>,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self, StoreError> {
        Ok(Self {
            id: job.id.clone(),
            name: job.name.clone(),
            schedule: job.schedule.clone(),
            task_type: job.task.task_type.clone(),
            task_data: serde_json::to_string(&job.task.data)?,
            status: job.status.as_str(),
            last_run: job.last_run.map(timestamp),
            next_run: job.next_run.map(timestamp),
            retry_attempts: i64::from(job.retry_attempts),
            max_retries: i64::from(job.max_retries),
            lease_owner: job.lease.as_ref().map(|l| l.owner.clone()),
            lease_expires_at: job.lease.as_ref().map(|l| timestamp(l.expires_at)),
            created_at: timestamp(job.created_at),
            updated_at: timestamp(job.updated_at),
            tags: job.tags.clone(),
        })
    }
}

fn load_tags(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM job_tags WHERE job_id = ?1 ORDER BY rowid")?;
    let tags = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

fn load_row(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<JobRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            JobRow::from_row,
        )
        .optional()?;
    match row {
        Some(mut row) => {
            row.tags = load_tags(conn, &row.id)?;
            Ok(Some(row))
        }
        None => Ok(None),
    }
}

fn load_rows(
    conn: &rusqlite::Connection,
    clause: &str,
    params: impl Params,
) -> rusqlite::Result<Vec<JobRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM jobs {clause} {ORDER}"))?;
    let mut rows = stmt
        .query_map(params, JobRow::from_row)?
        .collect::<rusqlite::Result<Vec<JobRow>>>()?;
    for row in &mut rows {
        row.tags = load_tags(conn, &row.id)?;
    }
    Ok(rows)
}

fn write_record(conn: &rusqlite::Connection, record: &JobRecord) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE jobs
         SET name = ?2, schedule = ?3, task_type = ?4, task_data = ?5, status = ?6,
             last_run = ?7, next_run = ?8, retry_attempts = ?9, max_retries = ?10,
             lease_owner = ?11, lease_expires_at = ?12, updated_at = ?13
         WHERE id = ?1",
        params![
            record.id,
            record.name,
            record.schedule,
            record.task_type,
            record.task_data,
            record.status,
            record.last_run,
            record.next_run,
            record.retry_attempts,
            record.max_retries,
            record.lease_owner,
            record.lease_expires_at,
            record.updated_at,
        ],
    )?;
    replace_tags(conn, &record.id, &record.tags)
}

fn replace_tags(conn: &rusqlite::Connection, id: &str, tags: &[String]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM job_tags WHERE job_id = ?1", [id])?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO job_tags (job_id, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![id, tag])?;
    }
    Ok(())
}
