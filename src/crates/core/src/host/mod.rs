//! Host ports
//!
//! The conversation UI that embeds the polisher owns messages, rendering, persistence and status
//! display. The core reaches it only through these traits.

mod memory;

pub use memory::{InMemoryChat, InMemorySettings};

use crate::message::ChatMessage;
use std::sync::Arc;

/// Read/write access to the host's conversation by message index.
pub trait MessageStore: Send + Sync {
    fn message(&self, index: usize) -> Option<ChatMessage>;

    fn messages(&self) -> Vec<ChatMessage>;

    /// Mutate one message in place. Returns `false` when the index does not exist.
    fn update(&self, index: usize, apply: &mut dyn FnMut(&mut ChatMessage)) -> bool;

    fn save_chat_debounced(&self);
}

/// The host's visual representation of messages.
pub trait MessageView: Send + Sync {
    /// Whether a live visual element currently exists for the message.
    fn is_mounted(&self, index: usize) -> bool;

    /// The host's own formatter. `None` when unavailable or when formatting failed.
    fn format_message(&self, _text: &str, _message: &ChatMessage, _index: usize) -> Option<String> {
        None
    }

    fn set_body_html(&self, index: usize, html: &str);
}

/// Outbound host notifications.
pub trait HostEvents: Send + Sync {
    /// Re-fire the host's message-arrival notification for `index`.
    fn emit_message_received(&self, index: usize);

    /// Hosts without a rendered notification get the settle-delay fallback instead.
    fn emits_render_notifications(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub kind: StatusKind,
    pub message: String,
}

impl StatusUpdate {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }
}

/// Control-surface feedback: transient status text and the manual-trigger/stop affordances.
pub trait StatusSink: Send + Sync {
    fn show_status(&self, status: &StatusUpdate);

    /// `true` while an attempt is live (manual trigger disabled, stop enabled).
    fn set_polishing(&self, active: bool);
}

/// All host ports the service needs, bundled.
#[derive(Clone)]
pub struct HostBridge {
    pub store: Arc<dyn MessageStore>,
    pub view: Arc<dyn MessageView>,
    pub events: Arc<dyn HostEvents>,
    pub status: Arc<dyn StatusSink>,
}
