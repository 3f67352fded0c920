//! Job ids currently executing, locally or on a peer.
//!
//! Local entries are owned by this instance's executions and only a local
//! release removes them. Remote entries come from peers' `JobStarted`
//! announcements; they carry the time they were seen so entries whose
//! `SlotFreed` was lost can be pruned.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote { seen_at: DateTime<Utc> },
}

#[derive(Debug, Default)]
pub struct RunningSet {
    entries: Mutex<HashMap<String, Origin>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` as a local execution unless it is present or the set
    /// holds `max` entries.
    pub fn try_reserve(&self, id: &str, max: usize) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= max || entries.contains_key(id) {
            return false;
        }
        entries.insert(id.to_string(), Origin::Local);
        true
    }

    /// Record a peer's execution. Not bounded by the local ceiling and never
    /// replaces a local entry.
    pub fn insert_remote(&self, id: &str, seen_at: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(Origin::Local) => {}
            _ => {
                entries.insert(id.to_string(), Origin::Remote { seen_at });
            }
        }
    }

    /// Free the slot of a local execution.
    pub fn release(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Drop a peer's entry. Local entries are left alone.
    pub fn release_remote(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        if matches!(entries.get(id), Some(Origin::Remote { .. })) {
            entries.remove(id);
            true
        } else {
            false
        }
    }

    /// Remove remote entries seen before `cutoff`. Returns the pruned ids.
    pub fn prune_remote(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, origin)| matches!(origin, Origin::Remote { seen_at } if *seen_at < cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            entries.remove(id);
        }
        stale
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn is_local(&self, id: &str) -> bool {
        matches!(self.entries.lock().get(id), Some(Origin::Local))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_full(&self, max: usize) -> bool {
        self.len() >= max
    }
}
