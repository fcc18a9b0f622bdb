//! Scripted in-process backend.
//!
//! Holds a job list served as snapshots and lets the caller push lifecycle
//! events into open streams. Used by the test suites and by embedders that
//! want to drive the engine without a server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EventStream, EventSubscriber, JobSubmitter, SnapshotFetcher};
use crate::error::SyncError;
use crate::model::{FileType, JobRecord, LifecycleEvent, Snapshot, UploadFile};

type StreamItem = Result<LifecycleEvent, SyncError>;

#[derive(Default)]
struct StreamStats {
    open: usize,
    max_open: usize,
    opened_total: usize,
}

#[derive(Default)]
struct Inner {
    records: Vec<JobRecord>,
    fetch_failures: Option<String>,
    fetch_count: usize,
    refused: HashMap<String, String>,
    senders: HashMap<String, mpsc::UnboundedSender<StreamItem>>,
    stats: HashMap<String, StreamStats>,
    submit_error: Option<String>,
}

/// Decrements the open-stream count when the stream is dropped.
struct OpenGuard {
    job_id: String,
    inner: Arc<Mutex<Inner>>,
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(stats) = inner.stats.get_mut(&self.job_id) {
            stats.open = stats.open.saturating_sub(1);
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory implementation of every transport trait.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the job list served by `fetch_snapshot`.
    pub fn set_records(&self, records: Vec<JobRecord>) {
        lock(&self.inner).records = records;
    }

    /// Replaces (or adds) one job in the served list.
    pub fn put_record(&self, record: JobRecord) {
        let mut inner = lock(&self.inner);
        match inner.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => inner.records.push(record),
        }
    }

    /// Makes every fetch fail with a network error until cleared with `None`.
    pub fn set_fetch_error(&self, message: Option<&str>) {
        lock(&self.inner).fetch_failures = message.map(|m| m.to_string());
    }

    /// Number of `fetch_snapshot` calls so far.
    pub fn fetch_count(&self) -> usize {
        lock(&self.inner).fetch_count
    }

    /// Makes `subscribe` fail for `job_id` until `allow_subscriptions` is called.
    pub fn refuse_subscriptions(&self, job_id: &str, message: &str) {
        lock(&self.inner)
            .refused
            .insert(job_id.to_string(), message.to_string());
    }

    pub fn allow_subscriptions(&self, job_id: &str) {
        lock(&self.inner).refused.remove(job_id);
    }

    /// Makes the next submissions fail with a rejection.
    pub fn set_submit_error(&self, message: Option<&str>) {
        lock(&self.inner).submit_error = message.map(|m| m.to_string());
    }

    /// Pushes an event into the newest stream for `job_id`.
    ///
    /// Returns false if no stream is listening.
    pub fn emit(&self, job_id: &str, event: LifecycleEvent) -> bool {
        self.emit_item(job_id, Ok(event))
    }

    /// Pushes a raw item (including errors) into the newest stream for `job_id`.
    pub fn emit_item(&self, job_id: &str, item: StreamItem) -> bool {
        let inner = lock(&self.inner);
        match inner.senders.get(job_id) {
            Some(sender) => sender.send(item).is_ok(),
            None => false,
        }
    }

    /// Ends the newest stream for `job_id` without a terminal event.
    pub fn end_stream(&self, job_id: &str) {
        lock(&self.inner).senders.remove(job_id);
    }

    /// Streams for `job_id` that are currently held by a consumer.
    pub fn open_streams(&self, job_id: &str) -> usize {
        lock(&self.inner)
            .stats
            .get(job_id)
            .map(|s| s.open)
            .unwrap_or(0)
    }

    /// Highest number of simultaneously open streams seen for `job_id`.
    pub fn max_open_streams(&self, job_id: &str) -> usize {
        lock(&self.inner)
            .stats
            .get(job_id)
            .map(|s| s.max_open)
            .unwrap_or(0)
    }

    /// Streams ever opened for `job_id`.
    pub fn subscriptions_opened(&self, job_id: &str) -> usize {
        lock(&self.inner)
            .stats
            .get(job_id)
            .map(|s| s.opened_total)
            .unwrap_or(0)
    }

    /// Streams currently open across all jobs.
    pub fn total_open_streams(&self) -> usize {
        lock(&self.inner).stats.values().map(|s| s.open).sum()
    }
}

#[async_trait]
impl SnapshotFetcher for InMemoryTransport {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SyncError> {
        let mut inner = lock(&self.inner);
        inner.fetch_count += 1;
        if let Some(message) = &inner.fetch_failures {
            return Err(SyncError::Network(message.clone()));
        }
        Ok(Snapshot::from_records(inner.records.clone()))
    }
}

#[async_trait]
impl EventSubscriber for InMemoryTransport {
    async fn subscribe(&self, job_id: &str) -> Result<EventStream, SyncError> {
        let (sender, receiver) = mpsc::unbounded_channel::<StreamItem>();
        {
            let mut inner = lock(&self.inner);
            if let Some(message) = inner.refused.get(job_id) {
                return Err(SyncError::Network(message.clone()));
            }
            inner.senders.insert(job_id.to_string(), sender);
            let stats = inner.stats.entry(job_id.to_string()).or_default();
            stats.open += 1;
            stats.opened_total += 1;
            stats.max_open = stats.max_open.max(stats.open);
        }

        let guard = OpenGuard {
            job_id: job_id.to_string(),
            inner: Arc::clone(&self.inner),
        };
        let stream = futures_util::stream::unfold(
            (receiver, guard),
            |(mut receiver, guard)| async move {
                receiver.recv().await.map(|item| (item, (receiver, guard)))
            },
        );

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl JobSubmitter for InMemoryTransport {
    async fn submit(&self, files: Vec<UploadFile>) -> Result<JobRecord, SyncError> {
        let first = files
            .first()
            .ok_or_else(|| SyncError::Submit("no files provided".to_string()))?;

        let mut inner = lock(&self.inner);
        if let Some(message) = &inner.submit_error {
            return Err(SyncError::Submit(message.clone()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let record = JobRecord::queued(&id, &first.filename, FileType::from_filename(&first.filename));
        inner.records.push(record.clone());
        Ok(record)
    }
}
