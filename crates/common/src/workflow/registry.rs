//! Concurrent registry of in-flight workflows.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::time::{Clock, SystemClock};

#[derive(Debug)]
struct WorkflowRecord<L> {
    listener: L,
    last_activity: Instant,
}

/// Tracks which workflow ids are in flight and their last activity.
///
/// `L` is the listener handle stored per workflow (typically an
/// `Arc<dyn ExecutionListener>`). Reads are sharded; `is_active` is cheap
/// enough to gate every incoming event.
#[derive(Debug)]
pub struct WorkflowRegistry<L, C: Clock = SystemClock> {
    workflows: DashMap<String, WorkflowRecord<L>>,
    clock: C,
}

impl<L> WorkflowRegistry<L, SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<L> Default for WorkflowRegistry<L, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, C: Clock> WorkflowRegistry<L, C> {
    pub fn with_clock(clock: C) -> Self {
        Self { workflows: DashMap::new(), clock }
    }

    /// Register a workflow. Returns `false` and leaves the existing entry
    /// (including its listener) untouched when the id is already present.
    pub fn register(&self, id: impl Into<String>, listener: L) -> bool {
        let id = id.into();
        match self.workflows.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(workflow_id = %id, "workflow already registered, keeping existing entry");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(WorkflowRecord { listener, last_activity: self.clock.now() });
                info!(workflow_id = %id, "workflow registered");
                true
            }
        }
    }

    /// Remove a workflow. Returns whether it was present.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.workflows.remove(id).is_some();
        if removed {
            info!(workflow_id = %id, "workflow unregistered");
        }
        removed
    }

    /// Whether the workflow is currently in flight.
    pub fn is_active(&self, id: &str) -> bool {
        self.workflows.contains_key(id)
    }

    /// Refresh a workflow's activity timestamp. No-op when absent.
    pub fn touch(&self, id: &str) {
        if let Some(mut record) = self.workflows.get_mut(id) {
            record.last_activity = self.clock.now();
        }
    }

    /// Clone of the workflow's listener handle, `None` when absent.
    pub fn get_listener(&self, id: &str) -> Option<L>
    where
        L: Clone,
    {
        self.workflows.get(id).map(|record| record.listener.clone())
    }

    /// Remove every workflow idle longer than `max_inactive` and return the
    /// removed ids. Bounds memory when owners crash without unregistering.
    pub fn sweep(&self, max_inactive: Duration) -> Vec<String> {
        let now = self.clock.now();
        let stale: Vec<String> = self
            .workflows
            .iter()
            .filter(|entry| {
                now.saturating_duration_since(entry.value().last_activity) > max_inactive
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            // Staleness is re-checked under the entry lock so a concurrent
            // touch between collection and removal keeps the workflow alive.
            let was_removed = self
                .workflows
                .remove_if(&id, |_, record| {
                    now.saturating_duration_since(record.last_activity) > max_inactive
                })
                .is_some();
            if was_removed {
                debug!(workflow_id = %id, "swept inactive workflow");
                removed.push(id);
            }
        }
        removed
    }

    /// Number of in-flight workflows.
    pub fn active_count(&self) -> usize {
        self.workflows.len()
    }

    /// Ids of in-flight workflows, sorted for deterministic reporting.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
