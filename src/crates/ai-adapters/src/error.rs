use thiserror::Error;

pub type AdapterResult<T> = Result<T, AiAdapterError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiAdapterError {
    /// Endpoint or credential missing; raised before any request is issued.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-2xx reply, malformed body, or an error event inside the stream.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Request cancelled")]
    Cancelled,

    /// Connection-level failure (DNS, TLS, reset, broken body read).
    #[error("Transport error: {0}")]
    Transport(String),
}

impl AiAdapterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AiAdapterError::Cancelled)
    }
}

impl From<reqwest::Error> for AiAdapterError {
    fn from(err: reqwest::Error) -> Self {
        AiAdapterError::Transport(err.to_string())
    }
}

/// A single stream event that could not be decoded. Never escapes the stream loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SSE parsing error: {reason}, data: {data}")]
pub struct StreamParseError {
    pub reason: String,
    pub data: String,
}
