use super::MessageStore;
use crate::config::SettingsPersistence;
use crate::message::ChatMessage;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A conversation held in memory. Debounced saves are only counted.
#[derive(Debug, Default)]
pub struct InMemoryChat {
    messages: Mutex<Vec<ChatMessage>>,
    saves: AtomicUsize,
}

impl InMemoryChat {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, message: ChatMessage) -> usize {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push(message);
        messages.len() - 1
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl MessageStore for InMemoryChat {
    fn message(&self, index: usize) -> Option<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, index: usize, apply: &mut dyn FnMut(&mut ChatMessage)) -> bool {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        match messages.get_mut(index) {
            Some(message) => {
                apply(message);
                true
            }
            None => false,
        }
    }

    fn save_chat_debounced(&self) {
        self.saves.fetch_add(1, Ordering::SeqCst);
    }
}

/// Settings persistence that keeps the last saved object.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    last: Mutex<Option<Value>>,
}

impl InMemorySettings {
    pub fn last_saved(&self) -> Option<Value> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsPersistence for InMemorySettings {
    fn save_settings_debounced(&self, _module: &str, settings: &Value) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
    }
}
