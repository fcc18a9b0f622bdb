//! Test harness running a full engine against the in-memory backend.
//!
//! Tests use tokio's paused clock, so sleeps advance virtual time and the
//! poll interval only fires when a test waits past it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use transync::{InMemoryTransport, JobRecord, JobStatus, SyncConfig, SyncEngine};

/// Poll interval used by the harness; tests refresh manually in between.
pub const POLL_SECS: u64 = 30;

pub struct SyncHarness {
    pub transport: InMemoryTransport,
    pub engine: SyncEngine,
}

impl SyncHarness {
    /// Starts an engine whose backend initially serves `records`.
    pub async fn start(records: Vec<JobRecord>) -> Self {
        Self::with_config(test_config(), records).await
    }

    pub async fn with_config(config: SyncConfig, records: Vec<JobRecord>) -> Self {
        let transport = InMemoryTransport::new();
        transport.set_records(records);

        let engine = SyncEngine::builder(config)
            .transport(Arc::new(transport.clone()))
            .start()
            .expect("engine should start");

        let harness = Self { transport, engine };
        harness
            .wait_until("first poll", |h| h.transport.fetch_count() >= 1)
            .await;
        harness.settle().await;
        harness
    }

    /// Lets spawned tasks run without reaching the next poll tick.
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Polls `check` until it holds, panicking after one virtual second.
    pub async fn wait_until<F>(&self, what: &str, check: F)
    where
        F: Fn(&SyncHarness) -> bool,
    {
        for _ in 0..1000 {
            if check(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    /// Waits until exactly one stream for `job_id` is open.
    pub async fn wait_for_stream(&self, job_id: &str) {
        self.wait_until(&format!("stream for {}", job_id), |h| {
            h.transport.open_streams(job_id) == 1
        })
        .await;
    }

    /// Fetches the list now and waits for the merge to land.
    pub async fn poll_now(&self) {
        let before = self.transport.fetch_count();
        self.engine.refresh();
        self.wait_until("manual poll", |h| h.transport.fetch_count() > before)
            .await;
        self.settle().await;
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.engine.store().status_of(job_id)
    }

    pub fn record(&self, job_id: &str) -> JobRecord {
        self.engine
            .job(job_id)
            .unwrap_or_else(|| panic!("job {} not in store", job_id))
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        poll_interval_secs: POLL_SECS,
        ..SyncConfig::default()
    }
}
