//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};

use transync::{FileType, JobRecord, JobStatus};

/// Builder for creating `JobRecord` instances.
pub struct JobBuilder {
    record: JobRecord,
}

impl JobBuilder {
    /// A queued image job created at a fixed instant.
    pub fn new(id: &str) -> Self {
        let mut record = JobRecord::queued(id, &format!("{}.png", id), FileType::Image);
        record.created_at = base_time();
        record.updated_at = base_time();
        Self { record }
    }

    pub fn filename(mut self, filename: &str) -> Self {
        self.record.filename = filename.to_string();
        self.record.file_type = FileType::from_filename(filename);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.record.status = status;
        if status == JobStatus::Completed {
            self.record.progress = 100;
            self.record.completed_at = Some(base_time() + Duration::minutes(1));
        }
        self
    }

    pub fn progress(mut self, progress: u32) -> Self {
        self.record.progress = progress;
        self
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.record.status = JobStatus::Failed;
        self.record.error_message = Some(message.to_string());
        self
    }

    pub fn page_count(mut self, pages: u32) -> Self {
        self.record.page_count = pages;
        self
    }

    /// Shifts creation time by `minutes` from the base instant.
    pub fn created_minutes_after(mut self, minutes: i64) -> Self {
        self.record.created_at = base_time() + Duration::minutes(minutes);
        self
    }

    pub fn build(self) -> JobRecord {
        self.record
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Shorthand for a job in the given status.
pub fn job(id: &str, status: JobStatus) -> JobRecord {
    JobBuilder::new(id).status(status).build()
}
