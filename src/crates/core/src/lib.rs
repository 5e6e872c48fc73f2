// AI Polisher Core Library - message interception and streaming rewrite pipeline
// Layers: Util -> Message/Config/Host ports -> Context/Claim/Presentation -> Orchestrator -> Service

pub mod claim; // Message claim protocol - arrival-time masking and guaranteed release
pub mod config; // Settings load/merge/persist
pub mod context; // Context window and rewrite payload
pub mod host; // Host ports and in-memory implementations
pub mod message;
pub mod orchestrator; // Single-attempt rewrite state machine
pub mod presentation;
pub mod service; // Inbound ports and control surface
pub mod util; // Errors

pub use claim::{ClaimLease, ClaimOutcome};
pub use config::{PolisherSettings, SettingsHandle, SettingsPersistence, MODULE_NAME};
pub use context::{build_context_window, build_request_payload, ContextEntry};
pub use host::{
    HostBridge, HostEvents, InMemoryChat, InMemorySettings, MessageStore, MessageView, StatusKind,
    StatusSink, StatusUpdate,
};
pub use message::{ChatMessage, MessageExtra, MessageRole};
pub use orchestrator::{
    AttemptOrigin, PolishOrchestrator, PolishPhase, PolishReport, PolishRequest,
    POLISH_PLACEHOLDER,
};
pub use presentation::Presenter;
pub use service::PolisherService;
pub use util::errors::{PolishError, PolishResult};
