//! Execution of a single due job.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use tickwork_protocols::{
    CoordinationEvent, Job, JobExecutionContext, JobExecutionResult, JobPatch, JobStatus,
};

use crate::backoff::retry_delay;
use crate::error::{ExecutionError, SchedulerResult};
use crate::notifications::JobNotification;
use crate::scheduler::SchedulerInner;

impl SchedulerInner {
    /// Run one job whose running-set slot is already reserved.
    pub(crate) async fn execute(self: Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        self.publish(CoordinationEvent::JobStarted {
            job_id: job_id.clone(),
        });

        if let Err(e) = self.run_claimed(&job).await {
            error!(job_id = %job_id, "Unexpected error during execution: {}", e);
            self.fail_terminally(&job, e.to_string()).await;
        }

        self.running.release(&job_id);
        self.publish(CoordinationEvent::SlotFreed {
            job_id: job_id.clone(),
        });
        self.sweep_requested.notify_one();
    }

    async fn run_claimed(&self, job: &Job) -> SchedulerResult<()> {
        let now = self.clock.now();
        let lease_until = add_std(now, self.config.lease_duration());
        let Some(job) = self
            .store
            .claim(&job.id, &self.instance_id, now, lease_until)
            .await?
        else {
            debug!(job_id = %job.id, "Job claimed elsewhere, skipping");
            return Ok(());
        };

        let next_run = self.next_run_after(&job.schedule, now);
        debug!(job_id = %job.id, task_type = %job.task.task_type, "Executing job");

        let result = self.invoke(&job, now).await;
        if result.success {
            self.record_success(&job, now, next_run, result.data).await
        } else {
            let error = result.error.unwrap_or_else(|| "task failed".to_string());
            self.record_failure(&job, error).await
        }
    }

    /// Run the handler under the execution timeout. Never fails; problems
    /// become failure results.
    async fn invoke(&self, job: &Job, start_time: DateTime<Utc>) -> JobExecutionResult {
        let task_type = &job.task.task_type;
        let Some(handler) = self.registry.get(task_type) else {
            warn!(job_id = %job.id, task_type = %task_type, "No handler registered");
            return failure(ExecutionError::NoHandlerRegistered(task_type.clone()));
        };

        let payload = job.task.clone();
        let ctx = JobExecutionContext {
            job_id: job.id.clone(),
            retry_count: job.retry_attempts,
            start_time,
            payload: payload.clone(),
        };
        // Spawned so a timed-out handler keeps running detached.
        let handle = tokio::spawn(async move { handler.handle(payload, ctx).await });

        match tokio::time::timeout(self.config.execution_timeout, handle).await {
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    timeout_secs = self.config.execution_timeout.as_secs_f64(),
                    "Execution timed out"
                );
                failure(ExecutionError::Timeout)
            }
            Ok(Err(join_error)) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                error!(job_id = %job.id, "Handler panicked: {}", message);
                failure(ExecutionError::HandlerPanicked(message))
            }
            Ok(Err(join_error)) => failure(ExecutionError::TaskFailed(join_error.to_string())),
            Ok(Ok(Err(e))) => failure(ExecutionError::TaskFailed(e.to_string())),
            Ok(Ok(Ok(result))) => result,
        }
    }

    async fn record_success(
        &self,
        job: &Job,
        ran_at: DateTime<Utc>,
        next_run: DateTime<Utc>,
        data: Option<Value>,
    ) -> SchedulerResult<()> {
        let patch = JobPatch::new()
            .status(JobStatus::Scheduled)
            .next_run(Some(next_run))
            .last_run(Some(ran_at))
            .retry_attempts(0)
            .clear_lease();
        let updated = self.store.update(&job.id, patch).await?;
        info!(job_id = %job.id, next_run = %next_run, "Job succeeded");

        self.publish(CoordinationEvent::JobSucceeded {
            job_id: job.id.clone(),
            data: data.clone(),
        });
        self.notifier.emit(JobNotification::Completed {
            job: updated.unwrap_or_else(|| job.clone()),
            data,
        });
        Ok(())
    }

    async fn record_failure(&self, job: &Job, error: String) -> SchedulerResult<()> {
        let attempts = job.retry_attempts.saturating_add(1);
        let will_retry = attempts <= job.max_retries;

        let patch = if will_retry {
            let delay = retry_delay(attempts);
            let next_run = add_std(self.clock.now(), delay);
            warn!(
                job_id = %job.id,
                attempt = attempts,
                max_retries = job.max_retries,
                delay_secs = delay.as_secs(),
                "Job failed, will retry: {}",
                error
            );
            JobPatch::new()
                .status(JobStatus::Scheduled)
                .next_run(Some(next_run))
                .retry_attempts(attempts)
                .clear_lease()
        } else {
            warn!(
                job_id = %job.id,
                attempt = attempts,
                max_retries = job.max_retries,
                "Job failed permanently: {}",
                error
            );
            JobPatch::new()
                .status(JobStatus::Failed)
                .retry_attempts(attempts)
                .clear_lease()
        };
        let updated = self.store.update(&job.id, patch).await?;

        self.publish(CoordinationEvent::JobFailed {
            job_id: job.id.clone(),
            error: error.clone(),
            will_retry,
            retry_attempt: attempts,
            max_retries: job.max_retries,
        });
        self.notifier.emit(JobNotification::Failed {
            job: updated.unwrap_or_else(|| job.clone()),
            error,
            will_retry,
        });
        Ok(())
    }

    /// Mark a job `Failed` after an error outside the handler.
    async fn fail_terminally(&self, job: &Job, error: String) {
        let attempts = job.retry_attempts.saturating_add(1);
        let patch = JobPatch::new()
            .status(JobStatus::Failed)
            .retry_attempts(attempts)
            .clear_lease();
        let updated = match self.store.update(&job.id, patch).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job failure: {}", e);
                None
            }
        };

        self.publish(CoordinationEvent::JobFailed {
            job_id: job.id.clone(),
            error: error.clone(),
            will_retry: false,
            retry_attempt: attempts,
            max_retries: job.max_retries,
        });
        let job = updated.unwrap_or_else(|| Job {
            status: JobStatus::Failed,
            retry_attempts: attempts,
            lease: None,
            ..job.clone()
        });
        self.notifier.emit(JobNotification::Failed {
            job,
            error,
            will_retry: false,
        });
    }
}

fn failure(error: ExecutionError) -> JobExecutionResult {
    JobExecutionResult::failure(error.to_string())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `t + d`, saturating at the latest representable instant.
pub(crate) fn add_std(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `t - d`, saturating at the earliest representable instant.
pub(crate) fn sub_std(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
