//! Plain-text rendering of jobs and list state.

use transync::{JobRecord, JobStatus, ListHealth, StatusCounts};

/// One line per job: id, status, progress, file and any error.
pub fn job_line(record: &JobRecord) -> String {
    let mut line = format!(
        "{:<36}  {:<11}  {:>3}%  {}",
        record.id,
        record.status,
        record.progress,
        record.filename
    );
    if record.page_count > 0 {
        line.push_str(&format!(" ({} pages)", record.page_count));
    }
    if record.status == JobStatus::Failed {
        if let Some(message) = &record.error_message {
            line.push_str(&format!("  error: {}", message));
        }
    }
    line
}

pub fn counts_line(counts: &StatusCounts) -> String {
    format!(
        "{} jobs: {} queued, {} processing, {} completed, {} failed",
        counts.total(),
        counts.queued,
        counts.processing,
        counts.completed,
        counts.failed
    )
}

/// Warning shown while the list cannot be refreshed, if any.
pub fn health_warning(health: &ListHealth) -> Option<String> {
    if !health.degraded {
        return None;
    }
    let since = health
        .last_success
        .map(|t| format!(" (last refreshed {})", t.format("%H:%M:%S")))
        .unwrap_or_default();
    Some(format!(
        "Job list unavailable after {} attempts: {}{}",
        health.consecutive_failures,
        health.last_error.as_deref().unwrap_or("unknown error"),
        since
    ))
}
