//! Polisher AI adapters
//!
//! Talks to OpenAI-compatible `chat/completions` and `models` endpoints and turns streamed replies
//! into cumulative text snapshots.

pub mod client;
pub mod error;
pub mod stream_handler;
pub mod types;

pub use client::{ApiTarget, CompletionBackend, OpenAICompatClient};
pub use error::{AdapterResult, AiAdapterError, StreamParseError};
pub use stream_handler::{handle_openai_stream, SnapshotSink};
pub use types::openai::{ChatCompletionRequest, ChatTurn, TurnRole};
