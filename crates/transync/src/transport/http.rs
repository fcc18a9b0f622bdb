//! HTTP transport for the translation backend (JSON list, SSE stream, multipart upload).

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use log::{debug, info};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::sse::SseDecoder;
use super::{EventStream, EventSubscriber, JobSubmitter, SnapshotFetcher};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{JobRecord, LifecycleEvent, Snapshot, UploadFile};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Builds a readable message from a failed response.
fn describe_failure(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("HTTP {}: {}", status, parsed.error),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}

async fn failure_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    describe_failure(status, &body)
}

/// Yields raw body chunks, ending with `StreamInterrupted` on a transport
/// error or when no bytes arrive within `idle_timeout`.
///
/// Any chunk counts as activity, including keep-alive comments that decode
/// to no event.
fn read_chunks<S, B, E>(
    bytes: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<B, SyncError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    E: Display,
{
    stream::unfold(Some(bytes), move |state| async move {
        let mut bytes = state?;
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, bytes.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let message = format!("no data received for {}s", limit.as_secs_f32());
                    return Some((Err(SyncError::StreamInterrupted(message)), None));
                }
            },
            None => bytes.next().await,
        };
        match next? {
            Ok(chunk) => Some((Ok(chunk), Some(bytes))),
            Err(e) => Some((Err(SyncError::StreamInterrupted(e.to_string())), None)),
        }
    })
}

/// Decodes a `text/event-stream` body into lifecycle events.
fn decode_events<S, B, E>(bytes: S, idle_timeout: Option<Duration>) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut decoder = SseDecoder::new();
    let events = read_chunks(bytes, idle_timeout).flat_map(move |chunk| {
        let items: Vec<Result<LifecycleEvent, SyncError>> =
            match chunk.and_then(|bytes| decoder.push(bytes.as_ref())) {
                Ok(frames) => frames
                    .into_iter()
                    .map(|frame| LifecycleEvent::parse(&frame.event, &frame.data))
                    .collect(),
                Err(e) => vec![Err(e)],
            };
        stream::iter(items)
    });
    Box::pin(events)
}

/// Talks to the backend's `/api` routes.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    page_limit: u32,
    idle_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: &str, page_limit: u32) -> Result<Self, SyncError> {
        let client = Client::builder()
            .user_agent(concat!("transync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_limit,
            idle_timeout: None,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self::new(&config.api_url, config.page_limit)?
            .with_idle_timeout(config.stream_idle_timeout()))
    }

    /// Ends an event stream that receives no bytes at all for this long.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// URL of the event stream for one job.
    pub fn events_url(&self, job_id: &str) -> String {
        self.url(&format!("requests/{}/events", job_id))
    }
}

#[async_trait]
impl SnapshotFetcher for HttpTransport {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SyncError> {
        let response = self
            .client
            .get(self.url("requests"))
            .query(&[("limit", self.page_limit), ("offset", 0)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(failure_message(response).await));
        }

        let snapshot: Snapshot = response.json().await?;
        if snapshot.is_truncated() {
            debug!(
                "Snapshot truncated: {} of {} jobs fetched",
                snapshot.records.len(),
                snapshot.total
            );
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl EventSubscriber for HttpTransport {
    async fn subscribe(&self, job_id: &str) -> Result<EventStream, SyncError> {
        let response = self
            .client
            .get(self.events_url(job_id))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(failure_message(response).await));
        }

        debug!("Opened event stream for job {}", job_id);
        Ok(decode_events(
            Box::pin(response.bytes_stream()),
            self.idle_timeout,
        ))
    }
}

#[async_trait]
impl JobSubmitter for HttpTransport {
    async fn submit(&self, files: Vec<UploadFile>) -> Result<JobRecord, SyncError> {
        if files.is_empty() {
            return Err(SyncError::Submit("no files provided".to_string()));
        }

        let mut form = reqwest::multipart::Form::new();
        for file in files {
            let mime = file.mime_type();
            let part = reqwest::multipart::Part::bytes(file.bytes)
                .file_name(file.filename)
                .mime_str(&mime)
                .map_err(|e| SyncError::Submit(format!("Invalid MIME type '{}': {}", mime, e)))?;
            form = form.part("files", part);
        }

        let response = self
            .client
            .post(self.url("translate"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(SyncError::Submit(failure_message(response).await));
        }
        if !status.is_success() {
            return Err(SyncError::Network(failure_message(response).await));
        }

        let record: JobRecord = response.json().await?;
        info!("Submitted job {} ({})", record.id, record.filename);
        Ok(record)
    }
}
