//! Keeps exactly one live event stream per unfinished job.
//!
//! Each pass compares the desired set (every `queued`/`processing` job)
//! against the open handles, closes what is no longer wanted and opens
//! what is missing. Streams run on their own tasks and feed the
//! [`Reconciler`] directly, behind a per-subscription gate that `close`
//! shuts, so a closed subscription can never mutate the store again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::SyncError;
use crate::model::{JobRecord, StatusCategory};
use crate::sync::reconciler::{EventOutcome, Reconciler};
use crate::transport::EventSubscriber;

/// Identity of a subscription: the job plus the status category it was opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub job_id: String,
    pub category: StatusCategory,
}

impl SubscriptionKey {
    pub fn for_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            category: record.status.category(),
        }
    }

    /// Returns true if a job in this category needs a live stream.
    pub fn wants_stream(&self) -> bool {
        self.category == StatusCategory::Pending
    }

    /// Returns true if an open subscription for `self` also serves `desired`.
    ///
    /// `queued` and `processing` share a category, so moving between them
    /// keeps the stream; a change of category needs a fresh one.
    pub fn is_satisfied_by(&self, desired: &SubscriptionKey) -> bool {
        self.job_id == desired.job_id && self.category == desired.category
    }
}

/// Why a subscription task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The transport refused to open the stream.
    OpenFailed,
    /// A terminal event was delivered.
    Finished,
    /// The stream ended (or errored) before a terminal event.
    Interrupted,
    /// The handle was closed while the task was still running.
    Closed,
}

/// Reported by a subscription task when it stops on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionExit {
    pub job_id: String,
    pub generation: u64,
    pub reason: ExitReason,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    pub opened: Vec<String>,
    pub closed: Vec<String>,
}

impl SubscriptionDelta {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

fn lock_gate(gate: &Mutex<bool>) -> MutexGuard<'_, bool> {
    match gate.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owner's side of one live subscription.
///
/// Closing (explicitly or by drop) shuts the gate and cancels the task.
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    generation: u64,
    gate: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Releases the subscription. No event from it reaches the reconciler
    /// after this returns.
    pub fn close(self) {
        debug!(
            "Closing subscription for job {} (generation {})",
            self.key.job_id, self.generation
        );
        // Drop does the work
    }

    fn shut(&self) {
        *lock_gate(&self.gate) = false;
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shut();
    }
}

/// Everything a subscription task needs.
struct StreamTask {
    job_id: String,
    generation: u64,
    subscriber: Arc<dyn EventSubscriber>,
    reconciler: Arc<Reconciler>,
    gate: Arc<Mutex<bool>>,
    exits: mpsc::UnboundedSender<SubscriptionExit>,
}

impl StreamTask {
    /// Runs `apply` only while the gate is open. Returns false once closed.
    fn deliver<F>(&self, apply: F) -> bool
    where
        F: FnOnce(&Reconciler) -> EventOutcome,
    {
        let open = lock_gate(&self.gate);
        if !*open {
            return false;
        }
        apply(&self.reconciler);
        true
    }

    async fn run(self) {
        let reason = self.stream_events().await;
        let _ = self.exits.send(SubscriptionExit {
            job_id: self.job_id.clone(),
            generation: self.generation,
            reason,
        });
    }

    async fn stream_events(&self) -> ExitReason {
        let mut stream = match self.subscriber.subscribe(&self.job_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open event stream for job {}: {}", self.job_id, e);
                return ExitReason::OpenFailed;
            }
        };

        loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    let terminal = event.is_terminal();
                    if !self.deliver(|r| r.apply_event(&self.job_id, &event)) {
                        return ExitReason::Closed;
                    }
                    if terminal {
                        return ExitReason::Finished;
                    }
                }
                Some(Err(SyncError::MalformedEvent(message))) => {
                    warn!("Dropped malformed event for job {}: {}", self.job_id, message);
                }
                Some(Err(e)) => {
                    warn!("Event stream for job {} failed: {}", self.job_id, e);
                    if !self.deliver(|r| r.apply_interruption(&self.job_id, None)) {
                        return ExitReason::Closed;
                    }
                    return ExitReason::Interrupted;
                }
                None => {
                    if !self.deliver(|r| r.apply_interruption(&self.job_id, None)) {
                        return ExitReason::Closed;
                    }
                    return ExitReason::Interrupted;
                }
            }
        }
    }
}

/// Opens and closes per-job event streams to match the store.
///
/// Must be driven from inside a tokio runtime: opening spawns a task.
pub struct SubscriptionManager {
    subscriber: Arc<dyn EventSubscriber>,
    reconciler: Arc<Reconciler>,
    active: HashMap<String, SubscriptionHandle>,
    next_generation: u64,
    exits: mpsc::UnboundedSender<SubscriptionExit>,
    closed: bool,
}

impl SubscriptionManager {
    /// Creates a manager and the receiver on which its tasks report exits.
    pub fn new(
        subscriber: Arc<dyn EventSubscriber>,
        reconciler: Arc<Reconciler>,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionExit>) {
        let (exits, exit_rx) = mpsc::unbounded_channel();
        let manager = Self {
            subscriber,
            reconciler,
            active: HashMap::new(),
            next_generation: 1,
            exits,
            closed: false,
        };
        (manager, exit_rx)
    }

    /// One set-difference pass against the given records. Idempotent.
    pub fn reconcile(&mut self, records: &[JobRecord]) -> SubscriptionDelta {
        let mut delta = SubscriptionDelta::default();
        if self.closed {
            return delta;
        }

        let desired: HashMap<&str, SubscriptionKey> = records
            .iter()
            .map(|r| (r.id.as_str(), SubscriptionKey::for_record(r)))
            .filter(|(_, key)| key.wants_stream())
            .collect();

        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|(id, handle)| match desired.get(id.as_str()) {
                Some(key) => !handle.key().is_satisfied_by(key),
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            if let Some(handle) = self.active.remove(&id) {
                handle.close();
                delta.closed.push(id);
            }
        }

        let mut missing: Vec<&SubscriptionKey> = desired
            .values()
            .filter(|key| !self.active.contains_key(&key.job_id))
            .collect();
        missing.sort_by(|a, b| a.job_id.cmp(&b.job_id));

        for key in missing {
            let handle = self.open(key.clone());
            delta.opened.push(key.job_id.clone());
            self.active.insert(key.job_id.clone(), handle);
        }

        delta
    }

    fn open(&mut self, key: SubscriptionKey) -> SubscriptionHandle {
        let generation = self.next_generation;
        self.next_generation += 1;

        let gate = Arc::new(Mutex::new(true));
        let task = StreamTask {
            job_id: key.job_id.clone(),
            generation,
            subscriber: Arc::clone(&self.subscriber),
            reconciler: Arc::clone(&self.reconciler),
            gate: Arc::clone(&gate),
            exits: self.exits.clone(),
        };

        let span = tracing::info_span!("sync.subscription", job_id = %key.job_id, generation);
        let task = tokio::spawn(task.run().instrument(span));
        debug!(
            "Opened subscription for job {} (generation {})",
            key.job_id, generation
        );

        SubscriptionHandle {
            key,
            generation,
            gate,
            task,
        }
    }

    /// Forgets a subscription whose task ended, if it is still the current one.
    pub fn handle_exit(&mut self, exit: &SubscriptionExit) -> bool {
        let current = self
            .active
            .get(&exit.job_id)
            .is_some_and(|handle| handle.generation() == exit.generation);
        if !current {
            return false;
        }

        if exit.reason == ExitReason::OpenFailed {
            debug!("Will retry event stream for job {} on next pass", exit.job_id);
        }
        if let Some(handle) = self.active.remove(&exit.job_id) {
            handle.close();
        }
        true
    }

    /// Closes one subscription.
    pub fn close(&mut self, job_id: &str) -> bool {
        match self.active.remove(job_id) {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Closes every subscription and refuses to open new ones.
    pub fn close_all(&mut self) -> usize {
        self.closed = true;
        let count = self.active.len();
        for (_, handle) in self.active.drain() {
            handle.close();
        }
        if count > 0 {
            info!("Closed {} event subscriptions", count);
        }
        count
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.contains_key(job_id)
    }

    /// Ids with an open subscription, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn generation_of(&self, job_id: &str) -> Option<u64> {
        self.active.get(job_id).map(|h| h.generation())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}
