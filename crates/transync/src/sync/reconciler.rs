//! Merges snapshots and lifecycle events into the job store.
//!
//! This is the only writer of the store. Poll results and push events meet
//! here, and the monotonicity guard keeps a stale snapshot from moving a
//! job backwards in its state machine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::model::{EventKind, JobRecord, JobStatus, LifecycleEvent, Snapshot, CONNECTION_INTERRUPTED};
use crate::store::JobStore;

/// Counts produced by one snapshot merge.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records whose lifecycle fields were kept because the local status was further along.
    pub guarded: usize,
}

impl MergeSummary {
    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The record moved to the given status.
    Applied(JobStatus),
    /// The event carried nothing new.
    Unchanged,
    /// `connected` events are only logged.
    Informational,
    /// No record with that id exists yet.
    UnknownJob,
    /// The record is already completed or failed.
    AlreadyTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotMerge {
    Insert,
    Overwrite,
    Guarded,
}

/// Computes the record a snapshot entry turns `current` into.
fn merge_snapshot_record(current: Option<&JobRecord>, incoming: &JobRecord) -> (JobRecord, SnapshotMerge) {
    match current {
        None => (incoming.clone(), SnapshotMerge::Insert),
        Some(local) if local.status.is_ahead_of(incoming.status) => {
            // Descriptive fields are not subject to the lifecycle race.
            let mut next = incoming.clone();
            next.status = local.status;
            next.progress = local.progress;
            next.error_message = local.error_message.clone();
            next.completed_at = local.completed_at;
            (next, SnapshotMerge::Guarded)
        }
        Some(_) => (incoming.clone(), SnapshotMerge::Overwrite),
    }
}

/// Computes the record an event turns `current` into, or why it does not apply.
fn merge_event(
    current: &JobRecord,
    event: &LifecycleEvent,
    now: DateTime<Utc>,
) -> Result<JobRecord, EventOutcome> {
    if event.kind == EventKind::Connected {
        return Err(EventOutcome::Informational);
    }
    if current.status.is_terminal() {
        return Err(EventOutcome::AlreadyTerminal);
    }

    let next = match event.kind {
        EventKind::Progress => {
            let mut next = current.clone();
            // Progress events never end a job; queued stays queued only if the server says so.
            next.status = match event.status {
                Some(JobStatus::Queued) if current.status == JobStatus::Queued => JobStatus::Queued,
                _ => JobStatus::Processing,
            };
            if let Some(progress) = event.progress {
                if progress < current.progress {
                    debug!(
                        "Progress for job {} went backwards ({} -> {}), keeping server value",
                        current.id, current.progress, progress
                    );
                }
                next.progress = progress;
            }
            next.updated_at = now;
            next
        }
        EventKind::Complete if event.status == Some(JobStatus::Failed) => current
            .clone()
            .into_failed(event.message_text().unwrap_or(CONNECTION_INTERRUPTED), now),
        EventKind::Complete => current.clone().into_completed(now),
        EventKind::StreamError => current
            .clone()
            .into_failed(event.message_text().unwrap_or(CONNECTION_INTERRUPTED), now),
        EventKind::Connected => return Err(EventOutcome::Informational),
    };

    Ok(next)
}

/// Single point of truth for store mutations.
pub struct Reconciler {
    store: Arc<JobStore>,
}

impl Reconciler {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Upserts every record of a snapshot under the monotonicity guard.
    ///
    /// Records missing from the snapshot are left alone.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> MergeSummary {
        let mut summary = MergeSummary::default();

        for incoming in &snapshot.records {
            let mut merge = SnapshotMerge::Overwrite;
            let changed = self.store.upsert(&incoming.id, |current| {
                let (next, kind) = merge_snapshot_record(current, incoming);
                merge = kind;
                Some(next)
            });

            if merge == SnapshotMerge::Guarded {
                summary.guarded += 1;
                debug!(
                    "Kept local status for job {} over stale snapshot status {}",
                    incoming.id,
                    incoming.status.as_str()
                );
            }
            match (changed.is_some(), merge) {
                (true, SnapshotMerge::Insert) => summary.inserted += 1,
                (true, _) => summary.updated += 1,
                (false, _) => summary.unchanged += 1,
            }
        }

        summary
    }

    /// Applies one lifecycle event to the matching record.
    pub fn apply_event(&self, job_id: &str, event: &LifecycleEvent) -> EventOutcome {
        let now = Utc::now();
        let mut outcome = EventOutcome::Unchanged;

        let stored = self.store.upsert(job_id, |current| {
            let Some(current) = current else {
                outcome = EventOutcome::UnknownJob;
                return None;
            };
            match merge_event(current, event, now) {
                Ok(next) => Some(next),
                Err(skip) => {
                    outcome = skip;
                    None
                }
            }
        });

        if let Some(record) = stored {
            outcome = EventOutcome::Applied(record.status);
            match record.status {
                JobStatus::Completed => info!("Job {} completed", job_id),
                JobStatus::Failed => warn!(
                    "Job {} failed: {}",
                    job_id,
                    record.error_message.as_deref().unwrap_or("unknown error")
                ),
                _ => debug!(
                    "Job {} {} at {}%",
                    job_id,
                    record.status.as_str(),
                    record.progress
                ),
            }
        } else if outcome == EventOutcome::UnknownJob {
            debug!("Dropped {} event for unknown job {}", event.kind.as_wire(), job_id);
        }

        outcome
    }

    /// Marks a job failed because its stream closed before a terminal event.
    pub fn apply_interruption(&self, job_id: &str, reason: Option<&str>) -> EventOutcome {
        if let Some(reason) = reason {
            debug!("Stream for job {} interrupted: {}", job_id, reason);
        }
        let event = LifecycleEvent::stream_error(None);
        self.apply_event(job_id, &event)
    }

    /// Inserts a job the client just submitted as `queued`.
    ///
    /// If a poll already delivered the job, the guard keeps its further-along status.
    pub fn insert_submitted(&self, record: JobRecord) -> Option<JobRecord> {
        let mut queued = record;
        queued.status = JobStatus::Queued;
        queued.progress = 0;
        queued.error_message = None;
        queued.completed_at = None;

        let id = queued.id.clone();
        let stored = self
            .store
            .upsert(&id, |current| Some(merge_snapshot_record(current, &queued).0));
        if stored.is_some() {
            info!("Tracking submitted job {} ({})", id, queued.filename);
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileType;

    fn record(id: &str, status: JobStatus, progress: u32) -> JobRecord {
        let mut record = JobRecord::queued(id, "chapter.zip", FileType::Archive);
        record.status = status;
        record.progress = progress;
        record
    }

    fn setup(records: Vec<JobRecord>) -> Reconciler {
        let reconciler = Reconciler::new(Arc::new(JobStore::new(64)));
        reconciler.apply_snapshot(&Snapshot::from_records(records));
        reconciler
    }

    fn status(reconciler: &Reconciler, id: &str) -> JobStatus {
        reconciler.store().status_of(id).unwrap()
    }

    #[test]
    fn test_snapshot_inserts_new_records() {
        let reconciler = Reconciler::new(Arc::new(JobStore::new(64)));
        let summary = reconciler.apply_snapshot(&Snapshot::from_records(vec![
            record("j1", JobStatus::Queued, 0),
            record("j2", JobStatus::Processing, 30),
        ]));
        assert_eq!(summary.inserted, 2);
        assert_eq!(reconciler.store().len(), 2);
    }

    #[test]
    fn test_same_snapshot_twice_is_noop() {
        let records = vec![record("j1", JobStatus::Processing, 30)];
        let reconciler = setup(records.clone());
        let mut rx = reconciler.store().subscribe();

        let summary = reconciler.apply_snapshot(&Snapshot::from_records(records));
        assert_eq!(summary.changed(), 0);
        assert_eq!(summary.unchanged, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_advances_status() {
        let reconciler = setup(vec![record("j3", JobStatus::Processing, 40)]);
        let summary = reconciler.apply_snapshot(&Snapshot::from_records(vec![record(
            "j3",
            JobStatus::Completed,
            100,
        )]));
        assert_eq!(summary.updated, 1);
        assert_eq!(status(&reconciler, "j3"), JobStatus::Completed);
    }

    #[test]
    fn test_stale_snapshot_cannot_downgrade_terminal() {
        let reconciler = setup(vec![record("j1", JobStatus::Processing, 90)]);
        reconciler.apply_event("j1", &LifecycleEvent::complete());

        let mut stale = record("j1", JobStatus::Processing, 95);
        stale.page_count = 12;
        stale.thumbnail = Some("/thumb.png".to_string());
        let summary = reconciler.apply_snapshot(&Snapshot::from_records(vec![stale]));

        assert_eq!(summary.guarded, 1);
        let stored = reconciler.store().get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.page_count, 12);
        assert_eq!(stored.thumbnail.as_deref(), Some("/thumb.png"));
    }

    #[test]
    fn test_stale_queued_does_not_downgrade_processing() {
        let reconciler = setup(vec![record("j1", JobStatus::Queued, 0)]);
        reconciler.apply_event("j1", &LifecycleEvent::progress(JobStatus::Processing, 10));
        reconciler.apply_snapshot(&Snapshot::from_records(vec![record("j1", JobStatus::Queued, 0)]));
        assert_eq!(status(&reconciler, "j1"), JobStatus::Processing);
    }

    #[test]
    fn test_snapshot_completed_recovers_interrupted_job() {
        let reconciler = setup(vec![record("j4", JobStatus::Processing, 60)]);
        reconciler.apply_interruption("j4", Some("eof"));
        assert_eq!(status(&reconciler, "j4"), JobStatus::Failed);

        reconciler.apply_snapshot(&Snapshot::from_records(vec![record(
            "j4",
            JobStatus::Completed,
            100,
        )]));
        let stored = reconciler.store().get("j4").unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[test]
    fn test_progress_event_moves_queued_to_processing() {
        let reconciler = setup(vec![record("j1", JobStatus::Queued, 0)]);
        let outcome =
            reconciler.apply_event("j1", &LifecycleEvent::progress(JobStatus::Processing, 10));
        assert_eq!(outcome, EventOutcome::Applied(JobStatus::Processing));
        let stored = reconciler.store().get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.progress, 10);
    }

    #[test]
    fn test_progress_event_without_status_means_processing() {
        let reconciler = setup(vec![record("j1", JobStatus::Queued, 0)]);
        let event = LifecycleEvent::parse("progress", r#"{"progress":5}"#).unwrap();
        reconciler.apply_event("j1", &event);
        assert_eq!(status(&reconciler, "j1"), JobStatus::Processing);
    }

    #[test]
    fn test_progress_regression_accepted_as_given() {
        let reconciler = setup(vec![record("j1", JobStatus::Processing, 50)]);
        reconciler.apply_event("j1", &LifecycleEvent::progress(JobStatus::Processing, 40));
        assert_eq!(reconciler.store().get("j1").unwrap().progress, 40);
    }

    #[test]
    fn test_complete_event() {
        let reconciler = setup(vec![record("j2", JobStatus::Processing, 80)]);
        let outcome = reconciler.apply_event("j2", &LifecycleEvent::complete());
        assert_eq!(outcome, EventOutcome::Applied(JobStatus::Completed));
        let stored = reconciler.store().get("j2").unwrap();
        assert_eq!(stored.progress, 100);
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_complete_event_with_failed_status() {
        let reconciler = setup(vec![record("j1", JobStatus::Queued, 0)]);
        let event = LifecycleEvent::parse(
            "complete",
            r#"{"status":"failed","progress":0,"message":"Translation failed"}"#,
        )
        .unwrap();
        reconciler.apply_event("j1", &event);
        let stored = reconciler.store().get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("Translation failed"));
    }

    #[test]
    fn test_stream_error_uses_payload_message() {
        let reconciler = setup(vec![record("j1", JobStatus::Processing, 20)]);
        reconciler.apply_event("j1", &LifecycleEvent::stream_error(Some("OCR model crashed")));
        let stored = reconciler.store().get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("OCR model crashed"));
    }

    #[test]
    fn test_interruption_uses_generic_message() {
        let reconciler = setup(vec![record("j4", JobStatus::Processing, 20)]);
        reconciler.apply_interruption("j4", None);
        let stored = reconciler.store().get("j4").unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("Connection interrupted"));
    }

    #[test]
    fn test_events_never_move_terminal_jobs() {
        let reconciler = setup(vec![record("j2", JobStatus::Completed, 100)]);
        let outcome =
            reconciler.apply_event("j2", &LifecycleEvent::progress(JobStatus::Processing, 50));
        assert_eq!(outcome, EventOutcome::AlreadyTerminal);
        assert_eq!(reconciler.apply_interruption("j2", None), EventOutcome::AlreadyTerminal);
        assert_eq!(status(&reconciler, "j2"), JobStatus::Completed);
    }

    #[test]
    fn test_connected_event_is_informational() {
        let reconciler = setup(vec![record("j1", JobStatus::Queued, 0)]);
        let event = LifecycleEvent::parse(
            "connected",
            r#"{"status":"processing","progress":30,"message":"Connected to progress stream"}"#,
        )
        .unwrap();
        assert_eq!(reconciler.apply_event("j1", &event), EventOutcome::Informational);
        assert_eq!(status(&reconciler, "j1"), JobStatus::Queued);
    }

    #[test]
    fn test_event_for_unknown_job_dropped() {
        let reconciler = Reconciler::new(Arc::new(JobStore::new(8)));
        let outcome = reconciler.apply_event("ghost", &LifecycleEvent::complete());
        assert_eq!(outcome, EventOutcome::UnknownJob);
        assert!(reconciler.store().is_empty());
    }

    #[test]
    fn test_insert_submitted_forces_queued() {
        let reconciler = Reconciler::new(Arc::new(JobStore::new(8)));
        let mut submitted = record("new", JobStatus::Processing, 15);
        submitted.error_message = Some("stale".to_string());
        reconciler.insert_submitted(submitted).unwrap();

        let stored = reconciler.store().get("new").unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.progress, 0);
        assert!(stored.error_message.is_none());
    }

    #[test]
    fn test_insert_submitted_keeps_polled_progress() {
        let reconciler = setup(vec![record("new", JobStatus::Processing, 15)]);
        reconciler.insert_submitted(record("new", JobStatus::Queued, 0));
        assert_eq!(status(&reconciler, "new"), JobStatus::Processing);
    }

    #[test]
    fn test_no_regression_under_interleaving() {
        let snapshots = [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ];
        let events = [
            LifecycleEvent::progress(JobStatus::Processing, 30),
            LifecycleEvent::progress(JobStatus::Queued, 0),
            LifecycleEvent::complete(),
            LifecycleEvent::stream_error(None),
        ];

        // Every pair of (terminal-reaching step, follow-up) must keep the job terminal.
        for first in 0..8 {
            for second in 0..8 {
                let reconciler = setup(vec![record("j", JobStatus::Queued, 0)]);
                let mut reached_terminal = false;
                for step in [first, second, first ^ 1, second ^ 2] {
                    if step < 4 {
                        reconciler.apply_snapshot(&Snapshot::from_records(vec![record(
                            "j",
                            snapshots[step],
                            0,
                        )]));
                    } else {
                        reconciler.apply_event("j", &events[step - 4]);
                    }
                    let now = status(&reconciler, "j");
                    if reached_terminal {
                        assert!(now.is_terminal(), "regressed after steps {first},{second}");
                    }
                    reached_terminal |= now.is_terminal();
                }
            }
        }
    }
}
