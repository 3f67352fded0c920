use super::*;

use std::sync::atomic::AtomicUsize;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone};
use mockall::mock;
use serde_json::json;
use tokio_stream::StreamExt;

use tickwork_protocols::{
    handler_fn, HandlerError, JobExecutionContext, JobExecutionResult, JobInput, JobPatch,
    ManualClock, NewJob, StoreError, TaskHandler, TaskPayload,
};
use tickwork_store::MemoryJobStore;

use crate::error::SchedulerError;
use crate::notifications::{JobNotification, NotificationStream};

mock! {
    pub Store {}

    #[async_trait]
    impl JobStore for Store {
        async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;
        async fn list(&self) -> Result<Vec<Job>, StoreError>;
        async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError>;
        async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;
        async fn create(&self, job: NewJob) -> Result<Job, StoreError>;
        async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError>;
        async fn delete(&self, id: &str) -> Result<bool, StoreError>;
        async fn delete_expired(&self, older_than_days: u32) -> Result<u64, StoreError>;
        async fn claim(
            &self,
            id: &str,
            owner: &str,
            now: DateTime<Utc>,
            lease_until: DateTime<Utc>,
        ) -> Result<Option<Job>, StoreError>;
        async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;
    }
}

struct Harness {
    scheduler: Scheduler,
    store: Arc<MemoryJobStore>,
    clock: Arc<ManualClock>,
    registry: Arc<TaskRegistry>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_instance_id("test")
        .without_rate_limits()
}

fn harness(config: SchedulerConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(MemoryJobStore::with_clock(clock.clone()));
    let registry = Arc::new(TaskRegistry::new());
    let scheduler = Scheduler::builder(store.clone(), registry.clone())
        .config(config)
        .clock(clock.clone())
        .build();
    Harness {
        scheduler,
        store,
        clock,
        registry,
    }
}

fn input(name: &str) -> JobInput {
    JobInput::new(name, "* * * * *", TaskPayload::new("echo", json!({"n": 1})))
}

fn ok_handler() -> impl TaskHandler + 'static {
    handler_fn(|_payload, _ctx| async move { Ok(JobExecutionResult::success(Some(json!({"ok": true})))) })
}

fn failing_handler() -> impl TaskHandler + 'static {
    handler_fn(|_payload, _ctx| async move { Ok(JobExecutionResult::failure("boom")) })
}

struct PanickingHandler;

#[async_trait]
impl TaskHandler for PanickingHandler {
    async fn handle(
        &self,
        _payload: TaskPayload,
        _ctx: JobExecutionContext,
    ) -> Result<JobExecutionResult, HandlerError> {
        panic!("handler exploded");
    }
}

/// Make every scheduled job due and run one sweep to completion.
async fn run_due(h: &Harness) -> usize {
    h.clock.advance(Duration::seconds(61));
    let dispatched = h.scheduler.poll_once().await;
    h.scheduler.wait_for_idle().await;
    dispatched
}

async fn next_notification(stream: &mut NotificationStream) -> JobNotification {
    tokio::time::timeout(StdDuration::from_secs(5), stream.next())
        .await
        .expect("notification timed out")
        .expect("stream ended")
}

// ---- creation and mutation ----

#[tokio::test]
async fn test_create_job_schedules_next_run() {
    let h = harness(test_config());
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    assert_eq!(job.status, JobStatus::Scheduled);
    assert_eq!(job.retry_attempts, 0);
    assert_eq!(job.max_retries, 3);
    assert!(job.tags.is_empty());
    assert_eq!(job.next_run, Some(t0() + Duration::minutes(1)));
    assert!(job.next_run.unwrap() > job.created_at);
}

#[tokio::test]
async fn test_create_job_explicit_zero_retries() {
    let h = harness(test_config());
    let job = h
        .scheduler
        .create_job(input("a").with_max_retries(0).with_tags(["ops"]))
        .await
        .unwrap();
    assert_eq!(job.max_retries, 0);
    assert_eq!(job.tags, vec!["ops".to_string()]);
}

#[tokio::test]
async fn test_create_job_rejects_invalid_schedule() {
    let h = harness(test_config());
    let mut bad = input("a");
    bad.schedule = "every tuesday".to_string();

    let err = h.scheduler.create_job(bad).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidSchedule { ref expression } if expression == "every tuesday"));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_create_job_rejects_oversized_payload() {
    let mut config = test_config();
    config.max_payload_bytes = 64;
    let h = harness(config);
    let big = JobInput::new(
        "big",
        "* * * * *",
        TaskPayload::new("echo", json!({"blob": "x".repeat(100)})),
    );

    let err = h.scheduler.create_job(big).await.unwrap_err();
    assert!(matches!(err, SchedulerError::PayloadTooLarge { limit: 64, .. }));
    assert!(h.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_create_job_rate_limited() {
    let mut config = test_config();
    config.create_job_rate_per_minute = Some(2);
    let h = harness(config);

    h.scheduler.create_job(input("a")).await.unwrap();
    h.scheduler.create_job(input("b")).await.unwrap();
    let err = h.scheduler.create_job(input("c")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::RateLimitExceeded { operation: "create_job" }));

    tokio::time::advance(StdDuration::from_secs(45)).await;
    h.scheduler.create_job(input("d")).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trigger_job_rate_limited_leaves_job_unchanged() {
    let mut config = test_config();
    config.trigger_job_rate_per_minute = Some(2);
    let h = harness(config);
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    h.scheduler.trigger_job_now(&job.id).await.unwrap().unwrap();
    h.scheduler.trigger_job_now(&job.id).await.unwrap().unwrap();
    let before = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(before.next_run, Some(t0()));

    h.clock.advance(Duration::seconds(10));
    let err = h.scheduler.trigger_job_now(&job.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::RateLimitExceeded { operation: "trigger_job" }));

    let after = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(after.next_run, Some(t0()));
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_update_job_invalid_schedule_leaves_job_unchanged() {
    let h = harness(test_config());
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    let mut bad = input("renamed");
    bad.schedule = "61 * * * *".to_string();
    let err = h.scheduler.update_job(&job.id, bad).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));

    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored, job);
}

#[tokio::test]
async fn test_update_job_recomputes_next_run_only_on_schedule_change() {
    let h = harness(test_config());
    let job = h
        .scheduler
        .create_job(input("a").with_max_retries(7).with_tags(["ops"]))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(10));
    let renamed = h
        .scheduler
        .update_job(&job.id, input("renamed"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.name, "renamed");
    assert_eq!(renamed.next_run, job.next_run);
    assert_eq!(renamed.max_retries, 7);
    assert_eq!(renamed.tags, vec!["ops".to_string()]);

    let mut hourly = input("renamed");
    hourly.schedule = "0 * * * *".to_string();
    let rescheduled = h
        .scheduler
        .update_job(&job.id, hourly)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rescheduled.schedule, "0 * * * *");
    assert_eq!(rescheduled.next_run, Some(t0() + Duration::hours(1)));
    assert_eq!(rescheduled.status, JobStatus::Scheduled);
}

#[tokio::test]
async fn test_update_missing_job_returns_none() {
    let h = harness(test_config());
    assert!(h.scheduler.update_job("nope", input("a")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_job() {
    let h = harness(test_config());
    let job = h.scheduler.create_job(input("a")).await.unwrap();
    assert!(h.scheduler.delete_job(&job.id).await.unwrap());
    assert!(!h.scheduler.delete_job(&job.id).await.unwrap());
}

#[tokio::test]
async fn test_pause_twice_fails_without_change() {
    let h = harness(test_config());
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    let paused = h.scheduler.pause_job(&job.id).await.unwrap().unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.next_run, job.next_run);

    let err = h.scheduler.pause_job(&job.id).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidStateTransition {
            from: JobStatus::Paused,
            operation: "pause",
            ..
        }
    ));
    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored, paused);
}

#[tokio::test]
async fn test_resume_recomputes_next_run() {
    let h = harness(test_config());
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    let err = h.scheduler.resume_job(&job.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { operation: "resume", .. }));

    h.scheduler.pause_job(&job.id).await.unwrap();
    h.clock.advance(Duration::minutes(30));
    let resumed = h.scheduler.resume_job(&job.id).await.unwrap().unwrap();
    assert_eq!(resumed.status, JobStatus::Scheduled);
    assert_eq!(resumed.next_run, Some(t0() + Duration::minutes(31)));
}

#[tokio::test]
async fn test_pause_and_resume_emit_status_notifications() {
    let h = harness(test_config());
    let mut changes = h.scheduler.status_changes();
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    h.scheduler.pause_job(&job.id).await.unwrap();
    h.scheduler.resume_job(&job.id).await.unwrap();

    let first = next_notification(&mut changes).await;
    assert_eq!(first.job().status, JobStatus::Paused);
    let second = next_notification(&mut changes).await;
    assert_eq!(second.job().status, JobStatus::Scheduled);
}

#[tokio::test]
async fn test_missing_job_operations_return_none() {
    let h = harness(test_config());
    assert!(h.scheduler.pause_job("nope").await.unwrap().is_none());
    assert!(h.scheduler.resume_job("nope").await.unwrap().is_none());
    assert!(h.scheduler.trigger_job_now("nope").await.unwrap().is_none());
    assert!(h.scheduler.get_job("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_trigger_paused_job_makes_it_due() {
    let h = harness(test_config());
    h.registry.register("echo", ok_handler());
    let job = h.scheduler.create_job(input("a")).await.unwrap();
    h.scheduler.pause_job(&job.id).await.unwrap();

    let triggered = h.scheduler.trigger_job_now(&job.id).await.unwrap().unwrap();
    assert_eq!(triggered.status, JobStatus::Scheduled);
    assert_eq!(triggered.next_run, Some(t0()));

    assert_eq!(h.scheduler.poll_once().await, 1);
    h.scheduler.wait_for_idle().await;
    let ran = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(ran.last_run, Some(t0()));
}

#[tokio::test]
async fn test_trigger_failed_job_is_rejected() {
    let h = harness(test_config());
    let job = h.scheduler.create_job(input("a")).await.unwrap();
    h.store
        .update(&job.id, JobPatch::new().status(JobStatus::Failed))
        .await
        .unwrap();

    let err = h.scheduler.trigger_job_now(&job.id).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidStateTransition {
            from: JobStatus::Failed,
            operation: "trigger",
            ..
        }
    ));
}

#[tokio::test]
async fn test_queries() {
    let h = harness(test_config());
    let a = h
        .scheduler
        .create_job(input("a").with_tags(["ops"]))
        .await
        .unwrap();
    h.scheduler.create_job(input("b")).await.unwrap();
    h.scheduler.pause_job(&a.id).await.unwrap();

    assert_eq!(h.scheduler.list_jobs().await.unwrap().len(), 2);
    let ops = h.scheduler.jobs_by_tag("ops").await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].id, a.id);
    let paused = h.scheduler.jobs_by_status(JobStatus::Paused).await.unwrap();
    assert_eq!(paused.len(), 1);
}

// ---- execution ----

#[tokio::test]
async fn test_successful_execution_reschedules() {
    let h = harness(test_config());
    h.registry.register("echo", ok_handler());
    let mut completions = h.scheduler.completions();
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    assert_eq!(run_due(&h).await, 1);

    let ran_at = t0() + Duration::seconds(61);
    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Scheduled);
    assert_eq!(stored.retry_attempts, 0);
    assert_eq!(stored.last_run, Some(ran_at));
    assert_eq!(stored.next_run, Some(t0() + Duration::minutes(2)));
    assert!(stored.lease.is_none());
    assert_eq!(h.scheduler.running_count(), 0);

    match next_notification(&mut completions).await {
        JobNotification::Completed { job, data } => {
            assert_eq!(job.id, stored.id);
            assert_eq!(data, Some(json!({"ok": true})));
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_receives_payload_and_context() {
    let h = harness(test_config());
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let sink = seen.clone();
    h.registry.register(
        "echo",
        handler_fn(move |payload, ctx| {
            let sink = sink.clone();
            async move {
                *sink.lock() = Some((payload, ctx));
                Ok(JobExecutionResult::success(None))
            }
        }),
    );
    let job = h.scheduler.create_job(input("a")).await.unwrap();
    run_due(&h).await;

    let (payload, ctx) = seen.lock().clone().unwrap();
    assert_eq!(payload.data, json!({"n": 1}));
    assert_eq!(ctx.job_id, job.id);
    assert_eq!(ctx.retry_count, 0);
    assert_eq!(ctx.start_time, t0() + Duration::seconds(61));
}

#[tokio::test]
async fn test_failure_schedules_retry_with_backoff() {
    let h = harness(test_config());
    h.registry.register("echo", failing_handler());
    let mut failures = h.scheduler.failures();
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    run_due(&h).await;

    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Scheduled);
    assert_eq!(stored.retry_attempts, 1);
    assert_eq!(
        stored.next_run,
        Some(t0() + Duration::seconds(61) + Duration::seconds(20))
    );

    match next_notification(&mut failures).await {
        JobNotification::Failed {
            error, will_retry, ..
        } => {
            assert_eq!(error, "boom");
            assert!(will_retry);
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_error_counts_as_failure() {
    let h = harness(test_config());
    h.registry.register(
        "echo",
        handler_fn(|_payload, _ctx| async move { Err(HandlerError::new("connection refused")) }),
    );
    let mut failures = h.scheduler.failures();
    h.scheduler.create_job(input("a")).await.unwrap();
    run_due(&h).await;

    match next_notification(&mut failures).await {
        JobNotification::Failed { error, .. } => assert!(error.contains("connection refused")),
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_handler_is_retryable_failure() {
    let h = harness(test_config());
    let mut failures = h.scheduler.failures();
    let job = h.scheduler.create_job(input("a")).await.unwrap();

    run_due(&h).await;

    match next_notification(&mut failures).await {
        JobNotification::Failed {
            error, will_retry, ..
        } => {
            assert_eq!(error, "no handler registered for task type: echo");
            assert!(will_retry);
        }
        other => panic!("unexpected notification: {:?}", other),
    }
    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_attempts, 1);
}

#[tokio::test]
async fn test_zero_retries_fails_immediately() {
    let h = harness(test_config());
    h.registry.register("echo", failing_handler());
    let job = h
        .scheduler
        .create_job(input("a").with_max_retries(0))
        .await
        .unwrap();

    run_due(&h).await;

    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_execution() {
    let h = harness(test_config().with_execution_timeout(StdDuration::from_secs(1)));
    h.registry.register(
        "echo",
        handler_fn(|_payload, _ctx| async move {
            tokio::time::sleep(StdDuration::from_secs(60)).await;
            Ok(JobExecutionResult::success(None))
        }),
    );
    let mut failures = h.scheduler.failures();
    h.scheduler.create_job(input("a")).await.unwrap();

    run_due(&h).await;

    match next_notification(&mut failures).await {
        JobNotification::Failed { error, .. } => assert_eq!(error, "execution timed out"),
        other => panic!("unexpected notification: {:?}", other),
    }
    assert_eq!(h.scheduler.running_count(), 0);
}

#[tokio::test]
async fn test_panicking_handler_fails_execution() {
    let h = harness(test_config());
    h.registry.register("echo", PanickingHandler);
    let mut failures = h.scheduler.failures();
    h.scheduler.create_job(input("a")).await.unwrap();

    run_due(&h).await;

    match next_notification(&mut failures).await {
        JobNotification::Failed { error, .. } => {
            assert!(error.contains("handler exploded"), "got {}", error)
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn test_closed_gates_skip_sweep() {
    let h = harness(test_config());
    h.registry.register("echo", ok_handler());
    h.scheduler.create_job(input("a")).await.unwrap();
    h.clock.advance(Duration::seconds(61));

    h.scheduler.gates().set_online(false);
    assert_eq!(h.scheduler.poll_once().await, 0);

    h.scheduler.gates().set_online(true);
    h.scheduler.gates().set_foreground(false);
    assert_eq!(h.scheduler.poll_once().await, 0);

    h.scheduler.gates().set_foreground(true);
    assert_eq!(h.scheduler.poll_once().await, 1);
    h.scheduler.wait_for_idle().await;
}

#[tokio::test]
async fn test_sweep_dispatches_earliest_first_up_to_ceiling() {
    let h = harness(test_config().with_max_concurrent_jobs(1));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = order.clone();
    h.registry.register(
        "echo",
        handler_fn(move |_payload, ctx| {
            let sink = sink.clone();
            async move {
                sink.lock().push(ctx.job_id);
                Ok(JobExecutionResult::success(None))
            }
        }),
    );

    let late = h.scheduler.create_job(input("late")).await.unwrap();
    let early = h.scheduler.create_job(input("early")).await.unwrap();
    h.store
        .update(&early.id, JobPatch::new().next_run(Some(t0() - Duration::minutes(5))))
        .await
        .unwrap();

    assert_eq!(run_due(&h).await, 1);
    assert_eq!(h.scheduler.poll_once().await, 1);
    h.scheduler.wait_for_idle().await;

    assert_eq!(*order.lock(), vec![early.id, late.id]);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let h = harness(test_config());
    h.registry.register("echo", ok_handler());
    let job = h.scheduler.create_job(input("a")).await.unwrap();
    let claimed_at = t0() + Duration::seconds(61);
    h.store
        .claim(&job.id, "crashed", claimed_at, claimed_at + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    h.clock.advance(Duration::seconds(91));
    assert_eq!(h.scheduler.poll_once().await, 0);

    h.clock.advance(Duration::seconds(31));
    assert_eq!(h.scheduler.poll_once().await, 1);
    h.scheduler.wait_for_idle().await;
    let stored = h.scheduler.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Scheduled);
    assert!(stored.lease.is_none());
}

// ---- lifecycle ----

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent_and_loop_sweeps() {
    let h = harness(test_config().with_check_interval(StdDuration::from_secs(10)));
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    h.registry.register(
        "echo",
        handler_fn(move |_payload, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobExecutionResult::success(None))
            }
        }),
    );
    h.scheduler.create_job(input("a")).await.unwrap();

    h.scheduler.start().await;
    h.scheduler.start().await;
    assert!(h.scheduler.is_started());
    h.scheduler.wait_for_idle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    h.clock.advance(Duration::seconds(61));
    tokio::time::sleep(StdDuration::from_secs(11)).await;
    h.scheduler.wait_for_idle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    h.scheduler.stop().await;
    assert!(!h.scheduler.is_started());
    h.clock.advance(Duration::minutes(5));
    tokio::time::sleep(StdDuration::from_secs(30)).await;
    h.scheduler.wait_for_idle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_removes_expired_terminal_jobs() {
    let h = harness(test_config());
    let done = h.scheduler.create_job(input("done")).await.unwrap();
    let active = h.scheduler.create_job(input("active")).await.unwrap();
    h.store
        .update(&done.id, JobPatch::new().status(JobStatus::Completed))
        .await
        .unwrap();
    h.store
        .update(&active.id, JobPatch::new().status(JobStatus::Paused))
        .await
        .unwrap();

    h.clock.advance(Duration::days(31));
    h.scheduler.start().await;
    h.scheduler.stop().await;

    assert!(h.scheduler.get_job(&done.id).await.unwrap().is_none());
    assert!(h.scheduler.get_job(&active.id).await.unwrap().is_some());
}

// ---- store failures ----

fn scheduled_job(id: &str) -> Job {
    Job::from_new(
        id,
        NewJob {
            name: id.to_string(),
            schedule: "* * * * *".to_string(),
            task: TaskPayload::new("echo", json!({})),
            status: JobStatus::Scheduled,
            next_run: Some(t0()),
            max_retries: 3,
            tags: vec![],
        },
        t0(),
    )
}

fn mocked(store: MockStore) -> (Scheduler, Arc<TaskRegistry>) {
    let registry = Arc::new(TaskRegistry::new());
    let scheduler = Scheduler::builder(Arc::new(store), registry.clone())
        .config(test_config())
        .clock(Arc::new(ManualClock::new(t0())))
        .build();
    (scheduler, registry)
}

#[tokio::test]
async fn test_claim_error_marks_job_failed() {
    let job = scheduled_job("j1");
    let listed = job.clone();

    let mut store = MockStore::new();
    store
        .expect_reap_expired_leases()
        .returning(|_| Ok(Vec::new()));
    store
        .expect_list_by_status()
        .returning(move |_| Ok(vec![listed.clone()]));
    store
        .expect_claim()
        .returning(|_, _, _, _| Err(StoreError::Backend("database is locked".to_string())));
    store
        .expect_update()
        .withf(|id, patch| {
            id == "j1"
                && patch.status == Some(JobStatus::Failed)
                && patch.retry_attempts == Some(1)
                && patch.lease == Some(None)
        })
        .times(1)
        .returning(|_, _| Ok(None));

    let (scheduler, registry) = mocked(store);
    registry.register("echo", ok_handler());
    let mut failures = scheduler.failures();

    assert_eq!(scheduler.poll_once().await, 1);
    scheduler.wait_for_idle().await;

    match next_notification(&mut failures).await {
        JobNotification::Failed {
            job, error, will_retry,
        } => {
            assert_eq!(job.status, JobStatus::Failed);
            assert!(error.contains("database is locked"));
            assert!(!will_retry);
        }
        other => panic!("unexpected notification: {:?}", other),
    }
    assert_eq!(scheduler.running_count(), 0);
}

#[tokio::test]
async fn test_lost_claim_is_skipped() {
    let job = scheduled_job("j1");

    let mut store = MockStore::new();
    store
        .expect_reap_expired_leases()
        .returning(|_| Ok(Vec::new()));
    store
        .expect_list_by_status()
        .returning(move |_| Ok(vec![job.clone()]));
    store.expect_claim().returning(|_, _, _, _| Ok(None));
    store.expect_update().times(0);

    let (scheduler, registry) = mocked(store);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    registry.register(
        "echo",
        handler_fn(move |_payload, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobExecutionResult::success(None))
            }
        }),
    );

    assert_eq!(scheduler.poll_once().await, 1);
    scheduler.wait_for_idle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.running_count(), 0);
}

#[tokio::test]
async fn test_list_error_skips_sweep() {
    let mut store = MockStore::new();
    store
        .expect_reap_expired_leases()
        .returning(|_| Ok(Vec::new()));
    store
        .expect_list_by_status()
        .returning(|_| Err(StoreError::Backend("offline".to_string())));

    let (scheduler, _registry) = mocked(store);
    assert_eq!(scheduler.poll_once().await, 0);
}

#[tokio::test]
async fn test_create_store_error_propagates() {
    let mut store = MockStore::new();
    store
        .expect_create()
        .returning(|_| Err(StoreError::Backend("disk full".to_string())));

    let (scheduler, _registry) = mocked(store);
    let err = scheduler.create_job(input("a")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Store(StoreError::Backend(_))));
}
