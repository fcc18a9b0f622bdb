//! In-memory job record store with atomic per-record updates.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{JobRecord, JobStatus};
use crate::store::change::{ChangeBroadcaster, ChangeKind, StoreChange};

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed
    }

    /// Jobs that still need a live stream.
    pub fn pending(&self) -> usize {
        self.queued + self.processing
    }
}

struct StoreState {
    records: HashMap<String, JobRecord>,
    sealed: bool,
}

/// Holds the client-side view of every known job, keyed by id.
///
/// Every mutation goes through [`JobStore::upsert`], which replaces one
/// record as a whole while holding the write lock. The lock is never held
/// across an await point.
pub struct JobStore {
    state: RwLock<StoreState>,
    changes: ChangeBroadcaster,
}

impl JobStore {
    /// Creates an empty store whose change channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                records: HashMap::new(),
                sealed: false,
            }),
            changes: ChangeBroadcaster::new(capacity),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Applies `mutator` to the record for `job_id` (or `None` if absent)
    /// and stores the result.
    ///
    /// Returns the stored record when something changed. Returning `None`
    /// from the mutator, returning an identical record, or calling this on
    /// a sealed store leaves the store untouched and publishes nothing.
    pub fn upsert<F>(&self, job_id: &str, mutator: F) -> Option<JobRecord>
    where
        F: FnOnce(Option<&JobRecord>) -> Option<JobRecord>,
    {
        let mut state = self.write_state();
        if state.sealed {
            log::debug!("Store is sealed, dropping update for job {}", job_id);
            return None;
        }

        let current = state.records.get(job_id);
        let previous = current.map(|r| r.status);
        let next = mutator(current)?;

        if next.id != job_id {
            log::warn!(
                "Rejected update for job {}: mutator produced record for {}",
                job_id,
                next.id
            );
            return None;
        }
        if current == Some(&next) {
            return None;
        }

        let change = StoreChange {
            job_id: job_id.to_string(),
            kind: if previous.is_some() {
                ChangeKind::Updated
            } else {
                ChangeKind::Inserted
            },
            previous,
            status: next.status,
        };
        state.records.insert(job_id.to_string(), next.clone());

        // Published under the lock so observers see changes in mutation order
        self.changes.send(change);
        Some(next)
    }

    /// Stops accepting mutations. Reads keep working.
    pub fn seal(&self) {
        self.write_state().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.read_state().sealed
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Returns all jobs sorted by creation time (newest first).
    pub fn get_all(&self) -> Vec<JobRecord> {
        let state = self.read_state();
        let mut result: Vec<JobRecord> = state.records.values().cloned().collect();
        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        result
    }

    /// Returns a specific job by id.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.read_state().records.get(job_id).cloned()
    }

    /// Returns the status of a job without cloning the record.
    pub fn status_of(&self, job_id: &str) -> Option<JobStatus> {
        self.read_state().records.get(job_id).map(|r| r.status)
    }

    /// Returns all jobs that are queued or processing.
    pub fn get_pending(&self) -> Vec<JobRecord> {
        let state = self.read_state();
        state
            .records
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the count of jobs by status.
    pub fn counts(&self) -> StatusCounts {
        let state = self.read_state();
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            match record.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(256)
    }
}
