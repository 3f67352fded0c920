//! Task handler registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use tickwork_protocols::TaskHandler;

/// Maps task types to handlers.
///
/// One handler per type; registering a type again replaces the previous
/// handler. Safe to use from many tasks at once.
pub struct TaskRegistry {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register `handler` for `task_type`, replacing any existing one.
    pub fn register(&self, task_type: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.register_arc(task_type, Arc::new(handler));
    }

    pub fn register_arc(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        if self.handlers.insert(task_type.clone(), handler).is_some() {
            debug!(task_type = %task_type, "Replaced task handler");
        } else {
            debug!(task_type = %task_type, "Registered task handler");
        }
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).map(|h| h.value().clone())
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
