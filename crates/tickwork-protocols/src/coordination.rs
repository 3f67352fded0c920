//! Coordination channel protocol.
//!
//! Scheduler instances sharing one job store announce lifecycle events to
//! each other over a best-effort bus. Delivery is at-most-once and unordered,
//! and an instance never receives its own messages.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoordinationError;
use crate::job::{Job, JobStatus};

/// Event kinds, used to route subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    JobUpdated,
    JobDeleted,
    JobTriggered,
    JobStatusChanged,
    JobStarted,
    JobSucceeded,
    JobFailed,
    SlotFreed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::JobCreated => "job_created",
            EventKind::JobUpdated => "job_updated",
            EventKind::JobDeleted => "job_deleted",
            EventKind::JobTriggered => "job_triggered",
            EventKind::JobStatusChanged => "job_status_changed",
            EventKind::JobStarted => "job_started",
            EventKind::JobSucceeded => "job_succeeded",
            EventKind::JobFailed => "job_failed",
            EventKind::SlotFreed => "slot_freed",
        };
        f.write_str(name)
    }
}

/// A lifecycle event published by one scheduler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    JobCreated {
        job: Job,
    },
    JobUpdated {
        job: Job,
    },
    JobDeleted {
        job_id: String,
    },
    JobTriggered {
        job_id: String,
    },
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
    },
    /// The publisher reserved a slot for this job.
    JobStarted {
        job_id: String,
    },
    JobSucceeded {
        job_id: String,
        #[serde(default)]
        data: Option<Value>,
    },
    JobFailed {
        job_id: String,
        error: String,
        will_retry: bool,
        retry_attempt: u32,
        max_retries: u32,
    },
    /// The publisher released its slot for this job.
    SlotFreed {
        job_id: String,
    },
}

impl CoordinationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CoordinationEvent::JobCreated { .. } => EventKind::JobCreated,
            CoordinationEvent::JobUpdated { .. } => EventKind::JobUpdated,
            CoordinationEvent::JobDeleted { .. } => EventKind::JobDeleted,
            CoordinationEvent::JobTriggered { .. } => EventKind::JobTriggered,
            CoordinationEvent::JobStatusChanged { .. } => EventKind::JobStatusChanged,
            CoordinationEvent::JobStarted { .. } => EventKind::JobStarted,
            CoordinationEvent::JobSucceeded { .. } => EventKind::JobSucceeded,
            CoordinationEvent::JobFailed { .. } => EventKind::JobFailed,
            CoordinationEvent::SlotFreed { .. } => EventKind::SlotFreed,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            CoordinationEvent::JobCreated { job } | CoordinationEvent::JobUpdated { job } => {
                &job.id
            }
            CoordinationEvent::JobDeleted { job_id }
            | CoordinationEvent::JobTriggered { job_id }
            | CoordinationEvent::JobStatusChanged { job_id, .. }
            | CoordinationEvent::JobStarted { job_id }
            | CoordinationEvent::JobSucceeded { job_id, .. }
            | CoordinationEvent::JobFailed { job_id, .. }
            | CoordinationEvent::SlotFreed { job_id } => job_id,
        }
    }
}

/// Envelope carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationMessage {
    /// Instance id of the publisher.
    pub source: String,
    pub event: CoordinationEvent,
    pub timestamp: DateTime<Utc>,
}

impl CoordinationMessage {
    pub fn new(source: impl Into<String>, event: CoordinationEvent) -> Self {
        Self {
            source: source.into(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Subscriber callback. Invoked on the channel's delivery task; keep it short.
pub type EventCallback = Arc<dyn Fn(&CoordinationMessage) + Send + Sync>;

/// Handle returned by [`CoordinationChannel::subscribe`].
///
/// The subscription is removed when this is dropped or on
/// [`unsubscribe`](Subscription::unsubscribe).
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Best-effort pub/sub bus between scheduler instances.
pub trait CoordinationChannel: Send + Sync {
    /// Identity stamped on every message this endpoint publishes.
    fn instance_id(&self) -> &str;

    fn publish(&self, event: CoordinationEvent) -> Result<(), CoordinationError>;

    fn subscribe(&self, kind: EventKind, callback: EventCallback) -> Subscription;

    /// Stop delivering and drop all subscriptions.
    fn close(&self);
}
