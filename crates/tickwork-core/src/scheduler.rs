//! Scheduler construction, lifecycle and the polling loop.
//!
//! The public API lives in `scheduler_api.rs`, execution of a single job in
//! `scheduler_execution.rs` and peer coordination in
//! `scheduler_coordination.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use tickwork_protocols::{
    Clock, CoordinationChannel, CronService, Job, JobStatus, JobStore, Subscription, SystemClock,
};

use crate::bus::NoopChannel;
use crate::config::SchedulerConfig;
use crate::cron::StandardCron;
use crate::gates::SchedulerGates;
use crate::limiter::TokenBucket;
use crate::notifications::Notifier;
use crate::registry::TaskRegistry;
use crate::running_set::RunningSet;
use crate::scheduler_execution::sub_std;

/// Recurring-job scheduler.
///
/// Cheap to clone; clones share one instance.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) instance_id: String,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) channel: Arc<dyn CoordinationChannel>,
    pub(crate) cron: Arc<dyn CronService>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) gates: Arc<SchedulerGates>,
    pub(crate) running: RunningSet,
    pub(crate) notifier: Notifier,
    pub(crate) create_limiter: Option<TokenBucket>,
    pub(crate) trigger_limiter: Option<TokenBucket>,
    pub(crate) tracker: TaskTracker,
    /// Pending sweep request, serviced by the loop.
    pub(crate) sweep_requested: Notify,
    /// One sweep at a time.
    sweep_lock: tokio::sync::Mutex<()>,
    started: AtomicBool,
    run_loop: Mutex<Option<LoopHandle>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    channel: Option<Arc<dyn CoordinationChannel>>,
    cron: Option<Arc<dyn CronService>>,
    clock: Option<Arc<dyn Clock>>,
    gates: Option<Arc<SchedulerGates>>,
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            store,
            registry,
            config: SchedulerConfig::default(),
            channel: None,
            cron: None,
            clock: None,
            gates: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Coordination channel. Its instance id becomes the lease owner.
    pub fn channel(mut self, channel: Arc<dyn CoordinationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn cron(mut self, cron: Arc<dyn CronService>) -> Self {
        self.cron = Some(cron);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn gates(mut self, gates: Arc<SchedulerGates>) -> Self {
        self.gates = Some(gates);
        self
    }

    pub fn build(self) -> Scheduler {
        let channel = self.channel.unwrap_or_else(|| {
            let id = self
                .config
                .instance_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            Arc::new(NoopChannel::new(id))
        });
        let instance_id = channel.instance_id().to_string();
        let create_limiter = self
            .config
            .create_job_rate_per_minute
            .map(TokenBucket::per_minute);
        let trigger_limiter = self
            .config
            .trigger_job_rate_per_minute
            .map(TokenBucket::per_minute);

        let inner = Arc::new(SchedulerInner {
            config: self.config,
            instance_id,
            store: self.store,
            channel,
            cron: self.cron.unwrap_or_else(|| Arc::new(StandardCron::new())),
            registry: self.registry,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            gates: self.gates.unwrap_or_default(),
            running: RunningSet::new(),
            notifier: Notifier::new(),
            create_limiter,
            trigger_limiter,
            tracker: TaskTracker::new(),
            sweep_requested: Notify::new(),
            sweep_lock: tokio::sync::Mutex::new(()),
            started: AtomicBool::new(false),
            run_loop: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        });

        let subscriptions = inner.subscribe_coordination();
        *inner.subscriptions.lock() = subscriptions;

        Scheduler { inner }
    }
}

impl Scheduler {
    pub fn builder(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> SchedulerBuilder {
        SchedulerBuilder::new(store, registry)
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.inner.registry
    }

    pub fn gates(&self) -> &Arc<SchedulerGates> {
        &self.inner.gates
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Jobs in the running set, including ones announced by peers.
    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.inner.running.contains(job_id)
    }

    /// Sweep once, arm the recurring timer, then remove expired terminal jobs.
    ///
    /// Calling `start` on a started scheduler does nothing.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            instance_id = %self.inner.instance_id,
            interval_secs = self.inner.config.check_interval.as_secs_f64(),
            max_concurrent = self.inner.config.max_concurrent_jobs,
            "Scheduler starting"
        );

        self.inner.sweep().await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(self.inner.clone(), cancel.clone()));
        *self.inner.run_loop.lock() = Some(LoopHandle {
            cancel: cancel.clone(),
            task,
        });
        if !self.inner.started.load(Ordering::SeqCst) {
            // stop() ran while we were sweeping
            cancel.cancel();
        }

        self.inner.cleanup_expired().await;
    }

    /// Disarm the timer. In-flight executions keep running; see
    /// [`wait_for_idle`](Self::wait_for_idle).
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.inner.run_loop.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                error!("Scheduler loop ended abnormally: {}", e);
            }
        }
        info!(instance_id = %self.inner.instance_id, "Scheduler stopped");
    }

    /// Resolve once no execution is in flight.
    pub async fn wait_for_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Run one sweep now, whether or not the scheduler is started.
    /// Returns the number of executions dispatched.
    pub async fn poll_once(&self) -> usize {
        self.inner.sweep().await
    }

    /// Stop, wait for in-flight executions, then close the channel.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.wait_for_idle().await;
        self.inner.subscriptions.lock().clear();
        self.inner.channel.close();
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, cancel: CancellationToken) {
    let period = inner.config.check_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let reopened = inner.gates.reopened();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = inner.sweep_requested.notified() => {
                debug!("Sweep requested");
            }
            _ = reopened.notified() => {
                debug!("Gate reopened, sweeping");
            }
        }
        inner.sweep().await;
    }
}

impl SchedulerInner {
    /// Find due jobs and dispatch as many as the ceiling allows.
    pub(crate) async fn sweep(self: &Arc<Self>) -> usize {
        let _guard = self.sweep_lock.lock().await;

        if !self.gates.is_open() {
            debug!(
                online = self.gates.is_online(),
                foreground = self.gates.is_foreground(),
                "Gates closed, skipping sweep"
            );
            return 0;
        }

        let now = self.clock.now();
        let cutoff = sub_std(now, self.config.lease_duration());
        for job_id in self.running.prune_remote(cutoff) {
            warn!(job_id = %job_id, "Dropped peer slot with no SlotFreed");
        }

        let max = self.config.max_concurrent_jobs;
        if self.running.is_full(max) {
            debug!(running = self.running.len(), "At concurrency ceiling, skipping sweep");
            return 0;
        }

        match self.store.reap_expired_leases(now).await {
            Ok(reaped) => {
                for job in reaped {
                    warn!(job_id = %job.id, "Recovered job with expired lease");
                }
            }
            Err(e) => error!("Failed to reap expired leases: {}", e),
        }

        let mut due = match self.store.list_by_status(JobStatus::Scheduled).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to load scheduled jobs: {}", e);
                return 0;
            }
        };
        due.retain(|job| job.is_due(now));
        due.sort_by_key(|job| job.next_run);

        let mut dispatched = 0;
        for job in due {
            if self.running.is_full(max) {
                break;
            }
            if !self.running.try_reserve(&job.id, max) {
                continue;
            }
            self.dispatch(job);
            dispatched += 1;
        }
        if dispatched > 0 {
            debug!(dispatched, "Dispatched due jobs");
        }
        dispatched
    }

    fn dispatch(self: &Arc<Self>, job: Job) {
        let inner = self.clone();
        self.tracker.spawn(async move {
            inner.execute(job).await;
        });
    }

    /// Next fire time after `after`, or an hour later if the expression
    /// cannot produce one.
    pub(crate) fn next_run_after(&self, schedule: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        match self.cron.next_fire_time(schedule, after) {
            Ok(next) => next,
            Err(e) => {
                warn!(schedule = %schedule, "Cannot compute next run, retrying in 1h: {}", e);
                after + chrono::Duration::hours(1)
            }
        }
    }

    async fn cleanup_expired(&self) {
        match self.store.delete_expired(self.config.job_expiration_days).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed expired jobs"),
            Err(e) => error!("Failed to remove expired jobs: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
