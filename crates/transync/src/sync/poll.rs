//! Periodic list poller.
//!
//! Fetches the job list immediately and then on every interval tick (or
//! manual trigger), merging each snapshot through the reconciler. Cycles
//! never overlap: fetch and merge run sequentially on one task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::error::SyncError;
use crate::sync::reconciler::{MergeSummary, Reconciler};
use crate::transport::SnapshotFetcher;

/// Health of the list view, published after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Set once `consecutive_failures` reaches the configured threshold.
    pub degraded: bool,
}

/// Periodic snapshot fetcher feeding the reconciler.
pub struct PollLoop {
    fetcher: Arc<dyn SnapshotFetcher>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    failure_threshold: u32,
    health: watch::Sender<ListHealth>,
    trigger: Arc<Notify>,
    after_cycle: Option<Arc<Notify>>,
    shutdown: Arc<AtomicBool>,
}

impl PollLoop {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
        failure_threshold: u32,
    ) -> Self {
        let (health, _) = watch::channel(ListHealth::default());
        Self {
            fetcher,
            reconciler,
            interval,
            failure_threshold: failure_threshold.max(1),
            health,
            trigger: Arc::new(Notify::new()),
            after_cycle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Notified after every cycle, successful or not.
    pub fn with_cycle_notify(mut self, notify: Arc<Notify>) -> Self {
        self.after_cycle = Some(notify);
        self
    }

    pub fn health(&self) -> watch::Receiver<ListHealth> {
        self.health.subscribe()
    }

    /// Handle that requests an immediate cycle when notified.
    pub fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }

    /// Flag that stops the loop before its next cycle.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs one fetch-and-merge cycle and updates health.
    pub async fn poll_once(&self) -> Result<MergeSummary, SyncError> {
        match self.fetcher.fetch_snapshot().await {
            Ok(snapshot) => {
                if snapshot.is_truncated() {
                    log::debug!(
                        "Job list truncated: showing {} of {}",
                        snapshot.records.len(),
                        snapshot.total
                    );
                }
                let summary = self.reconciler.apply_snapshot(&snapshot);
                self.record_success();
                if summary.changed() > 0 {
                    log::debug!(
                        "Merged job list: {} inserted, {} updated, {} guarded",
                        summary.inserted,
                        summary.updated,
                        summary.guarded
                    );
                }
                Ok(summary)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_success(&self) {
        self.health.send_modify(|health| {
            if health.degraded {
                log::info!("Job list recovered after {} failed polls", health.consecutive_failures);
            }
            health.last_success = Some(Utc::now());
            health.last_error = None;
            health.consecutive_failures = 0;
            health.degraded = false;
        });
    }

    fn record_failure(&self, error: &SyncError) {
        let threshold = self.failure_threshold;
        self.health.send_modify(|health| {
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_error = Some(error.to_string());
            if !health.degraded && health.consecutive_failures >= threshold {
                log::warn!(
                    "Job list degraded after {} failed polls: {}",
                    health.consecutive_failures,
                    error
                );
                health.degraded = true;
            } else {
                log::warn!("Failed to fetch job list: {}", error);
            }
        });
    }

    /// Runs until the shutdown flag is set or the task is aborted.
    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle: u64 = 0;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {},
                _ = self.trigger.notified() => {
                    log::debug!("Manual job list refresh triggered");
                    timer.reset();
                },
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            cycle += 1;
            let span = tracing::debug_span!("sync.poll_cycle", cycle);
            // Errors are already recorded in health
            let _ = self.poll_once().instrument(span).await;

            if let Some(notify) = &self.after_cycle {
                notify.notify_one();
            }
        }

        log::debug!("Poll loop stopped after {} cycles", cycle);
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
