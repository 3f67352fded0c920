//! Transitions shared by the in-process backends.

use chrono::{DateTime, TimeDelta, Utc};
use tickwork_protocols::{Job, JobLease, JobPatch, JobStatus};

pub(crate) fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn claim_patch(owner: &str, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> JobPatch {
    JobPatch::new()
        .status(JobStatus::Running)
        .last_run(Some(now))
        .lease(Some(JobLease {
            owner: owner.to_string(),
            expires_at: lease_until,
        }))
}

pub(crate) fn reap_patch(now: DateTime<Utc>) -> JobPatch {
    JobPatch::new()
        .status(JobStatus::Scheduled)
        .next_run(Some(now))
        .clear_lease()
}

/// `now` minus the retention window. A window reaching past the earliest
/// representable instant yields that instant, so nothing expires.
pub(crate) fn expiry_cutoff(now: DateTime<Utc>, older_than_days: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(older_than_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn is_expired(job: &Job, cutoff: DateTime<Utc>) -> bool {
    job.status.is_terminal() && job.updated_at < cutoff
}

/// Creation order, id as tie-breaker.
pub(crate) fn sort_by_creation(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
