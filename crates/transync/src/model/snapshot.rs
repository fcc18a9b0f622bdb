//! Point-in-time job lists and upload payloads.

use serde::{Deserialize, Serialize};

use crate::model::record::JobRecord;

/// A full list of jobs fetched in one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "requests")]
    pub records: Vec<JobRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl Snapshot {
    /// Wraps a record list as a single, complete page.
    pub fn from_records(records: Vec<JobRecord>) -> Self {
        let total = records.len() as u64;
        let limit = records.len() as u32;
        Self {
            records,
            total,
            limit,
            offset: 0,
        }
    }

    /// Returns true if the server holds more jobs than this page carries.
    pub fn is_truncated(&self) -> bool {
        (self.offset as u64) + (self.records.len() as u64) < self.total
    }
}

/// A file handed to the job submitter.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// MIME type guessed from the filename.
    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}
