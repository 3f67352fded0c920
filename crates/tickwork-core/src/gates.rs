//! Connectivity and foreground gates.
//!
//! The scheduler only dispatches while both gates are open. Gates are
//! sampled at tick time; closing one never interrupts running executions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
pub struct SchedulerGates {
    online: AtomicBool,
    foreground: AtomicBool,
    reopened: Arc<Notify>,
}

impl SchedulerGates {
    /// Both gates open.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            foreground: AtomicBool::new(true),
            reopened: Arc::new(Notify::new()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.is_online() && self.is_foreground()
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        debug!(online, "Connectivity gate changed");
        if online && !was {
            self.reopened.notify_one();
        }
    }

    pub fn set_foreground(&self, foreground: bool) {
        let was = self.foreground.swap(foreground, Ordering::SeqCst);
        debug!(foreground, "Foreground gate changed");
        if foreground && !was {
            self.reopened.notify_one();
        }
    }

    /// Signalled whenever a closed gate opens.
    pub(crate) fn reopened(&self) -> Arc<Notify> {
        self.reopened.clone()
    }
}

impl Default for SchedulerGates {
    fn default() -> Self {
        Self::new()
    }
}
