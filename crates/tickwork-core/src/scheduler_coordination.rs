//! Peer coordination: slot accounting across instances.

use std::sync::Arc;

use tracing::{debug, warn};

use tickwork_protocols::{CoordinationEvent, CoordinationMessage, EventKind, Subscription};

use crate::scheduler::SchedulerInner;

impl SchedulerInner {
    /// Publish best-effort; failures are logged.
    pub(crate) fn publish(&self, event: CoordinationEvent) {
        let kind = event.kind();
        if let Err(e) = self.channel.publish(event) {
            warn!(event = %kind, "Failed to publish coordination event: {}", e);
        }
    }

    /// Track peers' slots. Callbacks hold a weak reference so the channel
    /// does not keep the scheduler alive.
    pub(crate) fn subscribe_coordination(self: &Arc<Self>) -> Vec<Subscription> {
        let weak = Arc::downgrade(self);
        let on_started = self.channel.subscribe(
            EventKind::JobStarted,
            Arc::new(move |message: &CoordinationMessage| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_remote_started(message);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        let on_freed = self.channel.subscribe(
            EventKind::SlotFreed,
            Arc::new(move |message: &CoordinationMessage| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_remote_freed(message);
                }
            }),
        );

        vec![on_started, on_freed]
    }

    fn on_remote_started(&self, message: &CoordinationMessage) {
        let job_id = message.event.job_id();
        debug!(job_id = %job_id, source = %message.source, "Peer started job");
        self.running.insert_remote(job_id, self.clock.now());
    }

    fn on_remote_freed(&self, message: &CoordinationMessage) {
        let job_id = message.event.job_id();
        debug!(job_id = %job_id, source = %message.source, "Peer freed slot");
        if self.running.release_remote(job_id) {
            self.sweep_requested.notify_one();
        }
    }
}
