//! In-process coordination channels.
//!
//! [`LocalBus`] is a hub over `tokio::sync::broadcast`; each scheduler
//! instance takes its own [`LocalBusEndpoint`]. [`NoopChannel`] drops every
//! message, which is what a lone instance needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tickwork_protocols::{
    CoordinationChannel, CoordinationError, CoordinationEvent, CoordinationMessage,
    EventCallback, EventKind, Subscription,
};

const DEFAULT_CAPACITY: usize = 1024;

/// Shared hub. Clone the `Arc` to hand it to several endpoints.
pub struct LocalBus {
    sender: broadcast::Sender<CoordinationMessage>,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Receivers lagging more than `capacity` messages lose the oldest ones.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    /// Attach an endpoint identified as `instance_id`.
    ///
    /// Must be called from within a tokio runtime: the endpoint spawns its
    /// delivery task here.
    pub fn endpoint(self: &Arc<Self>, instance_id: impl Into<String>) -> LocalBusEndpoint {
        LocalBusEndpoint::new(instance_id.into(), self.sender.clone())
    }
}

type SubscriberMap = RwLock<HashMap<u64, (EventKind, EventCallback)>>;

/// One instance's view of a [`LocalBus`].
pub struct LocalBusEndpoint {
    instance_id: String,
    sender: broadcast::Sender<CoordinationMessage>,
    subscribers: Arc<SubscriberMap>,
    next_id: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl LocalBusEndpoint {
    fn new(instance_id: String, sender: broadcast::Sender<CoordinationMessage>) -> Self {
        let subscribers: Arc<SubscriberMap> = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        tokio::spawn(deliver(
            instance_id.clone(),
            sender.subscribe(),
            subscribers.clone(),
            shutdown.clone(),
        ));

        Self {
            instance_id,
            sender,
            subscribers,
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

async fn deliver(
    instance_id: String,
    mut receiver: broadcast::Receiver<CoordinationMessage>,
    subscribers: Arc<SubscriberMap>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(instance_id = %instance_id, skipped, "Coordination messages dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        if message.source == instance_id {
            continue;
        }

        let kind = message.event.kind();
        let callbacks: Vec<EventCallback> = subscribers
            .read()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(&message);
        }
    }
    debug!(instance_id = %instance_id, "Coordination delivery stopped");
}

impl CoordinationChannel for LocalBusEndpoint {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn publish(&self, event: CoordinationEvent) -> Result<(), CoordinationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoordinationError::Closed);
        }
        // No receivers just means nobody is listening.
        let _ = self
            .sender
            .send(CoordinationMessage::new(self.instance_id.clone(), event));
        Ok(())
    }

    fn subscribe(&self, kind: EventKind, callback: EventCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().insert(id, (kind, callback));
        let subscribers = Arc::downgrade(&self.subscribers);
        Subscription::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.write().remove(&id);
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        self.subscribers.write().clear();
    }
}

impl Drop for LocalBusEndpoint {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Channel that loses every message.
#[derive(Debug)]
pub struct NoopChannel {
    instance_id: String,
}

impl NoopChannel {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }
}

impl CoordinationChannel for NoopChannel {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn publish(&self, _event: CoordinationEvent) -> Result<(), CoordinationError> {
        Ok(())
    }

    fn subscribe(&self, _kind: EventKind, _callback: EventCallback) -> Subscription {
        Subscription::noop()
    }

    fn close(&self) {}
}
