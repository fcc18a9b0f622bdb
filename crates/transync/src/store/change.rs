//! Change notifications published by the job store.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::JobStatus;

/// Whether a change created or replaced a record.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
}

/// Emitted after every effective upsert.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreChange {
    pub job_id: String,
    pub kind: ChangeKind,
    /// Status before the change (`None` for inserts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<JobStatus>,
    /// Status after the change.
    pub status: JobStatus,
}

impl StoreChange {
    /// Returns true if the change moved the job into a terminal status.
    pub fn became_terminal(&self) -> bool {
        self.status.is_terminal() && !self.previous.is_some_and(JobStatus::is_terminal)
    }
}

/// Fan-out of store changes to any number of observers.
#[derive(Clone)]
pub struct ChangeBroadcaster {
    sender: broadcast::Sender<StoreChange>,
}

impl ChangeBroadcaster {
    /// Creates a broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn send(&self, change: StoreChange) {
        // No active receivers is fine
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
