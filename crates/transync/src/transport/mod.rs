//! Boundary to the translation backend.
//!
//! The engine only talks to the server through these traits: a snapshot
//! fetcher for the periodic full-list poll, an event subscriber for per-job
//! push streams and a submitter for new jobs.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::SyncError;
use crate::model::{JobRecord, LifecycleEvent, Snapshot, UploadFile};

pub mod http;
pub mod memory;
pub mod sse;

pub use http::HttpTransport;
pub use memory::InMemoryTransport;

/// Lifecycle events for one job.
///
/// `Err(SyncError::MalformedEvent)` items are skipped by the consumer; any
/// other error item, or the end of the stream, ends the subscription.
/// Dropping the stream releases the underlying connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<LifecycleEvent, SyncError>> + Send>>;

/// Point-in-time retrieval of the job list.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SyncError>;
}

/// Opens a push stream for a single job.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self, job_id: &str) -> Result<EventStream, SyncError>;
}

/// Creates a new job on the server.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, files: Vec<UploadFile>) -> Result<JobRecord, SyncError>;
}
