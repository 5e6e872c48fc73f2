//! Presentation adapter: pushes text into the host's message record and its visual element.

use crate::host::{MessageStore, MessageView};
use log::{debug, trace};
use std::sync::Arc;

#[derive(Clone)]
pub struct Presenter {
    store: Arc<dyn MessageStore>,
    view: Arc<dyn MessageView>,
}

impl Presenter {
    pub fn new(store: Arc<dyn MessageStore>, view: Arc<dyn MessageView>) -> Self {
        Self { store, view }
    }

    pub fn store(&self) -> &dyn MessageStore {
        self.store.as_ref()
    }

    /// Write `text` into the message and re-render its element if one is mounted.
    ///
    /// A missing message or element is skipped silently. With `persist` the host's debounced save
    /// is requested.
    pub fn publish(&self, index: usize, text: &str, persist: bool) {
        let mut updated = None;
        let found = self.store.update(index, &mut |message| {
            message.text = text.to_string();
            updated = Some(message.clone());
        });
        if !found {
            debug!("Publish skipped, message not found: message_index={}", index);
            return;
        }

        if let Some(message) = updated {
            if self.view.is_mounted(index) {
                let html = self
                    .view
                    .format_message(text, &message, index)
                    .unwrap_or_else(|| escape_with_line_breaks(text));
                self.view.set_body_html(index, &html);
            } else {
                trace!("No visual element for message: message_index={}", index);
            }
        }

        if persist {
            self.store.save_chat_debounced();
        }
    }

    /// Preserve the pre-rewrite text in the side channel unless it is already there.
    pub fn ensure_original_text(&self, index: usize, text: &str) -> bool {
        self.store.update(index, &mut |message| {
            if message.extra.original_text.is_none() {
                message.extra.original_text = Some(text.to_string());
            }
        })
    }
}

/// Literal rendering used when the host formatter is unavailable.
pub fn escape_with_line_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '\n' => out.push_str("<br>"),
            _ => out.push(c),
        }
    }
    out
}
