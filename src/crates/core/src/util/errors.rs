use polisher_ai_adapters::AiAdapterError;
use thiserror::Error;

pub type PolishResult<T> = Result<T, PolishError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolishError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// User-initiated stop. Not a failure.
    #[error("Polish cancelled")]
    Cancelled,

    /// Another attempt holds the in-flight slot.
    #[error("Another polish attempt is already running")]
    Busy,

    #[error("Message not found: {0}")]
    MessageNotFound(usize),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PolishError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PolishError::Cancelled)
    }

    /// Failures that revert the message and show an error status.
    pub fn is_failure(&self) -> bool {
        !matches!(self, PolishError::Cancelled | PolishError::Busy)
    }
}

impl From<AiAdapterError> for PolishError {
    fn from(err: AiAdapterError) -> Self {
        match err {
            AiAdapterError::Config(msg) => PolishError::Config(msg),
            AiAdapterError::Api { status, body } => PolishError::Api { status, body },
            AiAdapterError::Cancelled => PolishError::Cancelled,
            AiAdapterError::Transport(msg) => PolishError::Unexpected(msg),
        }
    }
}

impl From<serde_json::Error> for PolishError {
    fn from(err: serde_json::Error) -> Self {
        PolishError::Unexpected(format!("JSON error: {}", err))
    }
}
