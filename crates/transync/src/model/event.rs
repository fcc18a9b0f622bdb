//! Lifecycle events delivered over a job's push stream.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::record::JobStatus;

/// Kind of a lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Stream opened; carries the server's view at connect time.
    Connected,
    /// Job is still running.
    Progress,
    /// Job reached its final state on the server.
    Complete,
    /// Server reported a failure over the stream.
    StreamError,
}

impl EventKind {
    /// Maps a Server-Sent Events `event:` name to a kind.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "connected" => Some(EventKind::Connected),
            "progress" => Some(EventKind::Progress),
            "complete" => Some(EventKind::Complete),
            "error" | "stream-error" => Some(EventKind::StreamError),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
            EventKind::StreamError => "error",
        }
    }

    /// Returns true if the server closes the stream after this kind.
    pub fn ends_stream(self) -> bool {
        matches!(self, EventKind::Complete | EventKind::StreamError)
    }
}

/// Payload shared by every event kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One message received over a job's push stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub status: Option<JobStatus>,
    pub progress: Option<u32>,
    pub message: Option<String>,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            kind,
            status: payload.status,
            progress: payload.progress,
            message: payload.message,
        }
    }

    /// Creates a progress event.
    pub fn progress(status: JobStatus, progress: u32) -> Self {
        Self {
            kind: EventKind::Progress,
            status: Some(status),
            progress: Some(progress),
            message: None,
        }
    }

    /// Creates a successful completion event.
    pub fn complete() -> Self {
        Self {
            kind: EventKind::Complete,
            status: Some(JobStatus::Completed),
            progress: Some(100),
            message: None,
        }
    }

    /// Creates a server-side failure event.
    pub fn stream_error(message: Option<&str>) -> Self {
        Self {
            kind: EventKind::StreamError,
            status: Some(JobStatus::Failed),
            progress: None,
            message: message.map(|m| m.to_string()),
        }
    }

    /// Parses an event from its wire name and JSON data.
    ///
    /// Unknown names and undecodable payloads are `MalformedEvent`. An empty
    /// payload is accepted as an event with no fields.
    pub fn parse(name: &str, data: &str) -> Result<Self, SyncError> {
        let kind = EventKind::from_wire(name)
            .ok_or_else(|| SyncError::MalformedEvent(format!("unknown event type '{}'", name)))?;

        let data = data.trim();
        let payload = if data.is_empty() {
            EventPayload::default()
        } else {
            serde_json::from_str::<EventPayload>(data).map_err(|e| {
                SyncError::MalformedEvent(format!("invalid '{}' payload: {}", name, e))
            })?
        };

        Ok(Self::new(kind, payload))
    }

    /// The non-empty message carried by the event, if any.
    pub fn message_text(&self) -> Option<&str> {
        self.message.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    /// Returns true if applying this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.kind.ends_stream()
    }
}
