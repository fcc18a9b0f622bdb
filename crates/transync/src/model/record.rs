//! Client-side job record and its lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message recorded when a stream ends without telling us why.
pub const CONNECTION_INTERRUPTED: &str = "Connection interrupted";

/// Lifecycle status of a translation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the per-job state machine. Terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Returns true if `self` is strictly further along than `other`.
    pub fn is_ahead_of(self, other: JobStatus) -> bool {
        self.rank() > other.rank()
    }

    /// Subscription category for this status.
    pub fn category(self) -> StatusCategory {
        if self.is_terminal() {
            StatusCategory::Terminal
        } else {
            StatusCategory::Pending
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// User-facing label, honouring width and alignment flags.
impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Queued => "In queue",
            JobStatus::Processing => "Translating",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        };
        f.pad(label)
    }
}

/// Coarse grouping of statuses used to decide whether a job needs a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// `queued` or `processing`: the job needs a subscription.
    Pending,
    /// `completed` or `failed`: no subscription.
    Terminal,
}

/// Kind of file a job was created from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileType {
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "zip", alias = "archive")]
    Archive,
}

impl FileType {
    /// Guesses the file type from a filename extension.
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") || lower.ends_with(".cbz") {
            FileType::Archive
        } else {
            FileType::Image
        }
    }
}

/// One translation request as seen by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job identifier.
    pub id: String,
    /// Name of the uploaded file.
    pub filename: String,
    /// Image or archive upload.
    pub file_type: FileType,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Percentage reported by the server. Taken as given, never clamped.
    #[serde(default)]
    pub progress: u32,
    /// Number of pages detected so far.
    #[serde(default)]
    pub page_count: u32,
    /// Thumbnail reference, once one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Failure reason, only meaningful when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a fresh `queued` record.
    pub fn queued(id: &str, filename: &str, file_type: FileType) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            filename: filename.to_string(),
            file_type,
            status: JobStatus::Queued,
            progress: 0,
            page_count: 0,
            thumbnail: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns true if this job is finished (completed or failed).
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns a copy moved to `completed` with full progress.
    pub fn into_completed(mut self, at: DateTime<Utc>) -> Self {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.error_message = None;
        self.updated_at = at;
        self.completed_at = Some(at);
        self
    }

    /// Returns a copy moved to `failed` with the given reason.
    pub fn into_failed(mut self, message: &str, at: DateTime<Utc>) -> Self {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.to_string());
        self.updated_at = at;
        self.completed_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_rank_ordering() {
        assert!(JobStatus::Processing.is_ahead_of(JobStatus::Queued));
        assert!(JobStatus::Completed.is_ahead_of(JobStatus::Processing));
        assert!(!JobStatus::Failed.is_ahead_of(JobStatus::Completed));
        assert!(!JobStatus::Completed.is_ahead_of(JobStatus::Failed));
        assert!(!JobStatus::Queued.is_ahead_of(JobStatus::Queued));
    }

    #[test]
    fn test_category() {
        assert_eq!(JobStatus::Queued.category(), StatusCategory::Pending);
        assert_eq!(JobStatus::Processing.category(), StatusCategory::Pending);
        assert_eq!(JobStatus::Failed.category(), StatusCategory::Terminal);
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(JobStatus::Queued.to_string(), "In queue");
        assert_eq!(JobStatus::Processing.to_string(), "Translating");
        assert_eq!(format!("[{:<9}]", JobStatus::Failed), "[Failed   ]");
    }

    #[test]
    fn test_deserialize_backend_request() {
        let json = r#"{
            "id": "6f1c4f0e-2f59-4c38-9a0a-2f8f1d3e4b5c",
            "filename": "chapter-01.zip",
            "fileType": "zip",
            "status": "processing",
            "progress": 42,
            "pageCount": 18,
            "thumbnail": "/api/files/6f1c/originals/page-001.png",
            "createdAt": "2026-01-12T09:30:00.123456789Z",
            "updatedAt": "2026-01-12T09:31:10Z"
        }"#;

        let record: JobRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.file_type, FileType::Archive);
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 42);
        assert_eq!(record.page_count, 18);
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_archive_alias_accepted() {
        let file_type: FileType = serde_json::from_str("\"archive\"").unwrap();
        assert_eq!(file_type, FileType::Archive);
        assert_eq!(serde_json::to_string(&file_type).unwrap(), "\"zip\"");
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(serde_json::from_str::<JobStatus>("\"paused\"").is_err());
    }

    #[test]
    fn test_file_type_from_filename() {
        assert_eq!(FileType::from_filename("vol1.ZIP"), FileType::Archive);
        assert_eq!(FileType::from_filename("page.png"), FileType::Image);
    }

    #[test]
    fn test_into_completed_sets_full_progress() {
        let record = JobRecord::queued("j1", "a.png", FileType::Image);
        let now = Utc::now();
        let done = record.into_completed(now);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.completed_at, Some(now));
    }
}
