use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolishPhase {
    #[default]
    Idle,
    Preparing,
    Streaming,
    NonStreaming,
    Finalizing,
}

/// How the attempt was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOrigin {
    /// First rewrite of this message; the placeholder may be shown.
    Fresh,
    /// Re-polish of a message whose original text is already preserved; the current text stays
    /// visible until the first snapshot.
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolishRequest {
    pub message_index: usize,
    /// Text sent for rewriting; also what cancel and failure revert to.
    pub source_text: String,
    pub origin: AttemptOrigin,
}

impl PolishRequest {
    pub fn fresh(message_index: usize, source_text: impl Into<String>) -> Self {
        Self {
            message_index,
            source_text: source_text.into(),
            origin: AttemptOrigin::Fresh,
        }
    }

    pub fn resumed(message_index: usize, source_text: impl Into<String>) -> Self {
        Self {
            message_index,
            source_text: source_text.into(),
            origin: AttemptOrigin::Resumed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolishReport {
    pub attempt_id: String,
    pub message_index: usize,
    pub text: String,
    pub streamed: bool,
    /// Snapshots published while streaming; 0 for a non-streamed attempt.
    pub snapshot_count: usize,
    pub context_messages: usize,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
}

impl PolishReport {
    pub fn duration_ms(&self) -> i64 {
        self.finished_at_ms - self.started_at_ms
    }
}
