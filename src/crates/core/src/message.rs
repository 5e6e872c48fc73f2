//! Conversation message model
//!
//! Messages are owned by the host; the core only reads them and writes text, role and the
//! polisher's provenance markers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    #[default]
    Assistant,
    /// Also the masking classification used while a message is claimed.
    System,
}

/// Provenance side channel on a message.
///
/// `claimed` and `processed` are never set together. Unknown host keys are carried through
/// untouched in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub claimed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub processed: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub extra: MessageExtra,
}

impl ChatMessage {
    pub fn new(name: impl Into<String>, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            text: text.into(),
            extra: MessageExtra::default(),
        }
    }

    pub fn user(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, MessageRole::User, text)
    }

    pub fn assistant(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, MessageRole::Assistant, text)
    }

    pub fn system(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, MessageRole::System, text)
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Assistant"
        } else {
            &self.name
        }
    }
}
