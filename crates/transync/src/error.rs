use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Event stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Submission rejected: {0}")]
    Submit(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync engine has been shut down")]
    ShutDown,
}

impl SyncError {
    /// Returns true if waiting for the next poll cycle (or retrying the
    /// action) can clear the error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::InvalidResponse(_)
                | SyncError::StreamInterrupted(_)
                | SyncError::MalformedEvent(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
