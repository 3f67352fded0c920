//! Job creation, mutation and queries.

use tracing::{debug, info};

use tickwork_protocols::{
    CoordinationEvent, Job, JobInput, JobPatch, JobStatus, NewJob, TaskPayload,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::limiter::TokenBucket;
use crate::notifications::{JobNotification, NotificationStream};
use crate::scheduler::{Scheduler, SchedulerInner};

impl Scheduler {
    /// Validate and persist a new job, scheduled for its next fire time.
    pub async fn create_job(&self, input: JobInput) -> SchedulerResult<Job> {
        let inner = &self.inner;
        inner.admit(inner.create_limiter.as_ref(), "create_job")?;
        inner.check_schedule(&input.schedule)?;
        inner.check_payload(&input.task)?;

        let now = inner.clock.now();
        let next_run = inner.next_run_after(&input.schedule, now);
        let job = inner
            .store
            .create(NewJob {
                name: input.name,
                schedule: input.schedule,
                task: input.task,
                status: JobStatus::Scheduled,
                next_run: Some(next_run),
                max_retries: input
                    .max_retries
                    .unwrap_or(inner.config.default_max_retries),
                tags: input.tags.unwrap_or_default(),
            })
            .await?;

        info!(job_id = %job.id, name = %job.name, next_run = %next_run, "Created job");
        inner.publish(CoordinationEvent::JobCreated { job: job.clone() });
        Ok(job)
    }

    /// Replace a job's definition. Status and retry count are kept.
    pub async fn update_job(&self, id: &str, input: JobInput) -> SchedulerResult<Option<Job>> {
        let inner = &self.inner;
        inner.check_schedule(&input.schedule)?;
        inner.check_payload(&input.task)?;

        let Some(existing) = inner.store.get(id).await? else {
            return Ok(None);
        };

        let mut patch = JobPatch::new()
            .name(input.name)
            .task(input.task)
            .max_retries(input.max_retries.unwrap_or(existing.max_retries))
            .tags(input.tags.unwrap_or(existing.tags));
        if input.schedule != existing.schedule {
            let next_run = inner.next_run_after(&input.schedule, inner.clock.now());
            patch = patch.next_run(Some(next_run));
        }
        patch = patch.schedule(input.schedule);

        let Some(job) = inner.store.update(id, patch).await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, "Updated job");
        inner.publish(CoordinationEvent::JobUpdated { job: job.clone() });
        Ok(Some(job))
    }

    /// Returns `false` if no such job existed.
    pub async fn delete_job(&self, id: &str) -> SchedulerResult<bool> {
        let deleted = self.inner.store.delete(id).await?;
        if deleted {
            info!(job_id = %id, "Deleted job");
            self.inner.publish(CoordinationEvent::JobDeleted {
                job_id: id.to_string(),
            });
        }
        Ok(deleted)
    }

    /// Stop a scheduled job from firing. `next_run` is left as is.
    pub async fn pause_job(&self, id: &str) -> SchedulerResult<Option<Job>> {
        let inner = &self.inner;
        let Some(job) = inner.store.get(id).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Scheduled {
            return Err(SchedulerError::InvalidStateTransition {
                id: job.id,
                from: job.status,
                operation: "pause",
            });
        }

        let patch = JobPatch::new().status(JobStatus::Paused);
        let Some(job) = inner.store.update(id, patch).await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, "Paused job");
        inner.status_changed(&job);
        Ok(Some(job))
    }

    /// Reschedule a paused job from its next fire time after now.
    pub async fn resume_job(&self, id: &str) -> SchedulerResult<Option<Job>> {
        let inner = &self.inner;
        let Some(job) = inner.store.get(id).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Paused {
            return Err(SchedulerError::InvalidStateTransition {
                id: job.id,
                from: job.status,
                operation: "resume",
            });
        }

        let next_run = inner.next_run_after(&job.schedule, inner.clock.now());
        let patch = JobPatch::new()
            .status(JobStatus::Scheduled)
            .next_run(Some(next_run));
        let Some(job) = inner.store.update(id, patch).await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, next_run = %next_run, "Resumed job");
        inner.status_changed(&job);
        Ok(Some(job))
    }

    /// Make a scheduled or paused job due immediately and request a sweep.
    pub async fn trigger_job_now(&self, id: &str) -> SchedulerResult<Option<Job>> {
        let inner = &self.inner;
        inner.admit(inner.trigger_limiter.as_ref(), "trigger_job")?;

        let Some(job) = inner.store.get(id).await? else {
            return Ok(None);
        };
        if !matches!(job.status, JobStatus::Scheduled | JobStatus::Paused) {
            return Err(SchedulerError::InvalidStateTransition {
                id: job.id,
                from: job.status,
                operation: "trigger",
            });
        }

        let patch = JobPatch::new()
            .status(JobStatus::Scheduled)
            .next_run(Some(inner.clock.now()));
        let Some(job) = inner.store.update(id, patch).await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, "Triggered job");
        inner.publish(CoordinationEvent::JobTriggered {
            job_id: job.id.clone(),
        });
        inner.sweep_requested.notify_one();
        Ok(Some(job))
    }

    pub async fn get_job(&self, id: &str) -> SchedulerResult<Option<Job>> {
        Ok(self.inner.store.get(id).await?)
    }

    pub async fn list_jobs(&self) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.store.list().await?)
    }

    pub async fn jobs_by_tag(&self, tag: &str) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.store.list_by_tag(tag).await?)
    }

    pub async fn jobs_by_status(&self, status: JobStatus) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.store.list_by_status(status).await?)
    }

    /// Pause and resume notifications.
    pub fn status_changes(&self) -> NotificationStream {
        self.inner
            .notifier
            .stream(|n| matches!(n, JobNotification::StatusChanged { .. }))
    }

    /// Successful executions.
    pub fn completions(&self) -> NotificationStream {
        self.inner
            .notifier
            .stream(|n| matches!(n, JobNotification::Completed { .. }))
    }

    /// Failed executions, retried or not.
    pub fn failures(&self) -> NotificationStream {
        self.inner
            .notifier
            .stream(|n| matches!(n, JobNotification::Failed { .. }))
    }
}

impl SchedulerInner {
    fn admit(&self, limiter: Option<&TokenBucket>, operation: &'static str) -> SchedulerResult<()> {
        match limiter {
            Some(bucket) if !bucket.try_acquire() => {
                debug!(operation, "Rate limit exceeded");
                Err(SchedulerError::RateLimitExceeded { operation })
            }
            _ => Ok(()),
        }
    }

    fn check_schedule(&self, expression: &str) -> SchedulerResult<()> {
        if self.cron.validate(expression) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
            })
        }
    }

    fn check_payload(&self, task: &TaskPayload) -> SchedulerResult<()> {
        let size = serde_json::to_vec(task)?.len();
        let limit = self.config.max_payload_bytes;
        if size > limit {
            return Err(SchedulerError::PayloadTooLarge { size, limit });
        }
        Ok(())
    }

    fn status_changed(&self, job: &Job) {
        self.publish(CoordinationEvent::JobStatusChanged {
            job_id: job.id.clone(),
            status: job.status,
        });
        self.notifier
            .emit(JobNotification::StatusChanged { job: job.clone() });
    }
}
