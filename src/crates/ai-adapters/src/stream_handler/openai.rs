use crate::error::{AdapterResult, AiAdapterError, StreamParseError};
use crate::types::openai::OpenAIStreamChunk;
use futures::{Stream, StreamExt};
use log::{debug, error, trace, warn};
use serde_json::Value;
use std::fmt::Display;
use tokio_util::sync::CancellationToken;

const SSE_DATA_FIELD: &str = "data:";
const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Receives the full text produced so far after every delta.
pub type SnapshotSink<'a> = &'a mut (dyn for<'s> FnMut(&'s str) + Send);

/// Splits raw body chunks into complete lines.
///
/// Framing is per line rather than per event: providers send one `data:` payload per line and do
/// not always separate them with blank lines, which an event-stream parser would merge.
///
/// Chunks from the network do not align with event boundaries, so the trailing partial line is kept
/// until a later chunk completes it. Bytes are buffered (not strings) so a multi-byte character split
/// across two reads is decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Drains whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    Skip,
}

pub fn classify_line(line: &str) -> SseLine<'_> {
    let Some(payload) = line.trim().strip_prefix(SSE_DATA_FIELD) else {
        return SseLine::Skip;
    };
    let payload = payload.trim_start();
    if payload == SSE_DONE_SENTINEL {
        SseLine::Done
    } else if payload.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Data(payload)
    }
}

/// Running total of the streamed text.
#[derive(Debug, Default)]
pub struct SnapshotAccumulator {
    text: String,
    deltas: usize,
}

impl SnapshotAccumulator {
    pub fn push_delta(&mut self, delta: &str) -> &str {
        self.text.push_str(delta);
        self.deltas += 1;
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamEvent {
    Delta(String),
    Empty,
    ProviderError(String),
}

fn extract_sse_api_error_message(event_json: &Value) -> Option<String> {
    let error = event_json.get("error")?;
    if let Some(message) = error.get("message").and_then(|value| value.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

fn decode_event(payload: &str) -> Result<StreamEvent, StreamParseError> {
    let parse_error = |reason: String| StreamParseError {
        reason,
        data: payload.to_string(),
    };

    let event_json: Value = serde_json::from_str(payload).map_err(|e| parse_error(e.to_string()))?;
    if let Some(message) = extract_sse_api_error_message(&event_json) {
        return Ok(StreamEvent::ProviderError(message));
    }

    let chunk: OpenAIStreamChunk =
        serde_json::from_value(event_json).map_err(|e| parse_error(e.to_string()))?;
    Ok(chunk
        .first_delta_text()
        .map(|text| StreamEvent::Delta(text.to_string()))
        .unwrap_or(StreamEvent::Empty))
}

fn apply_event(
    payload: &str,
    status: u16,
    accumulator: &mut SnapshotAccumulator,
    on_snapshot: SnapshotSink<'_>,
) -> AdapterResult<()> {
    match decode_event(payload) {
        Ok(StreamEvent::Delta(delta)) => on_snapshot(accumulator.push_delta(&delta)),
        Ok(StreamEvent::Empty) => {}
        Ok(StreamEvent::ProviderError(message)) => {
            error!("SSE API error: {}, data: {}", message, payload);
            return Err(AiAdapterError::Api {
                status,
                body: message,
            });
        }
        // A single bad event never ends the stream.
        Err(e) => debug!("Skipping malformed SSE event: {}", e),
    }
    Ok(())
}

fn finish_stream(
    accumulator: SnapshotAccumulator,
    status: u16,
    saw_done: bool,
) -> AdapterResult<String> {
    if !saw_done {
        warn!(
            "SSE stream closed without [DONE] sentinel: received_chars={}",
            accumulator.text().chars().count()
        );
    }
    if accumulator.is_empty() {
        return Err(AiAdapterError::Api {
            status,
            body: "stream ended without content".to_string(),
        });
    }
    debug!(
        "SSE stream finished: deltas={}, chars={}",
        accumulator.delta_count(),
        accumulator.text().chars().count()
    );
    Ok(accumulator.into_text())
}

/// Drive a streamed chat completion body to its end.
///
/// Every content delta is appended to a running total and the whole total is handed to
/// `on_snapshot`, so consumers only ever replace their display with the latest string.
///
/// # Arguments
/// * `stream` - raw body chunks (e.g. `reqwest::Response::bytes_stream`)
/// * `status` - HTTP status of the response, reported in `Api` errors
/// * `cancel` - checked before every read; cancellation wins over pending data
/// * `on_snapshot` - cumulative snapshot sink
pub async fn handle_openai_stream<S, B, E>(
    stream: S,
    status: u16,
    cancel: &CancellationToken,
    on_snapshot: SnapshotSink<'_>,
) -> AdapterResult<String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut lines = SseLineBuffer::new();
    let mut accumulator = SnapshotAccumulator::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(
                    "SSE stream cancelled: received_chars={}",
                    accumulator.text().chars().count()
                );
                return Err(AiAdapterError::Cancelled);
            }
            next = stream.next() => next,
        };

        let (batch, eof) = match next {
            Some(Ok(chunk)) => (lines.push(chunk.as_ref()), false),
            Some(Err(e)) => {
                let error_msg = format!("SSE stream error: {}", e);
                error!("{}", error_msg);
                return Err(AiAdapterError::Transport(error_msg));
            }
            None => (lines.finish().into_iter().collect::<Vec<_>>(), true),
        };

        for line in &batch {
            trace!("OpenAI SSE: {:?}", line);
            match classify_line(line) {
                SseLine::Skip => {}
                SseLine::Done => return finish_stream(accumulator, status, true),
                SseLine::Data(payload) => {
                    apply_event(payload, status, &mut accumulator, &mut *on_snapshot)?
                }
            }
        }

        if eof {
            return finish_stream(accumulator, status, false);
        }
    }
}
