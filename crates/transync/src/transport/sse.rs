//! Incremental Server-Sent Events decoder.

use crate::error::SyncError;

/// Most bytes held for a frame that has not been dispatched yet.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, `message` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Turns arbitrary byte chunks into complete frames.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; incomplete input
/// stays buffered until the next push. Lines end in `\n`, `\r\n` or a lone
/// `\r`. Comment lines (keep-alives) and unknown fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    // Last chunk ended in `\r`; a leading `\n` in the next one belongs to it.
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame it completed.
    ///
    /// Fails with `StreamInterrupted` once an undispatched frame grows past
    /// [`MAX_PENDING_BYTES`]; the decoder is reset in that case.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, SyncError> {
        let mut chunk = chunk;
        if self.skip_lf && !chunk.is_empty() {
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
            self.skip_lf = false;
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let mut consumed = pos + 1;
            if self.buffer[pos] == b'\r' {
                match self.buffer.get(pos + 1) {
                    Some(b'\n') => consumed += 1,
                    Some(_) => {}
                    None => self.skip_lf = true,
                }
            }
            let line: Vec<u8> = self.buffer.drain(..consumed).take(pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        let pending = self.buffer.len() + self.data_len;
        if pending > MAX_PENDING_BYTES {
            *self = Self::default();
            return Err(SyncError::StreamInterrupted(format!(
                "event larger than {} bytes",
                MAX_PENDING_BYTES
            )));
        }
        Ok(frames)
    }

    /// Returns true if a partially received frame is pending.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || !self.data.is_empty() || self.event.is_some()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
