//! Context assembly for the rewrite request
//!
//! Prior assistant utterances give the rewrite model continuity of style and plot. They are sent
//! in a delimited block the model is told not to repeat.

use crate::message::ChatMessage;

pub const CONTEXT_HEADER: &str = "[Context - reference only, do not polish or repeat]";
pub const TARGET_HEADER: &str = "[Text to polish - polish the following]";
const BLOCK_DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// Position of the message in the conversation.
    pub index: usize,
    pub name: String,
    pub content: String,
}

/// Up to `window_size` assistant messages before `target_index`, oldest first.
///
/// User messages, system-classified messages (including ones masked by a live claim) and empty
/// messages are skipped.
pub fn build_context_window(
    history: &[ChatMessage],
    target_index: usize,
    window_size: usize,
) -> Vec<ContextEntry> {
    if window_size == 0 {
        return Vec::new();
    }

    let end = target_index.min(history.len());
    let mut window: Vec<ContextEntry> = history[..end]
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, message)| !message.is_user() && !message.is_system() && !message.text.is_empty())
        .take(window_size)
        .map(|(index, message)| ContextEntry {
            index,
            name: message.display_name().to_string(),
            content: message.text.clone(),
        })
        .collect();
    window.reverse();
    window
}

/// The user-turn instruction: optional context block, then the delimited text to rewrite.
pub fn build_request_payload(target_text: &str, context: &[ContextEntry]) -> String {
    let mut payload = String::new();

    if !context.is_empty() {
        payload.push_str(CONTEXT_HEADER);
        payload.push('\n');
        payload.push_str(BLOCK_DELIMITER);
        payload.push('\n');
        for (position, entry) in context.iter().enumerate() {
            payload.push_str(&format!(
                "[#{} - {}]\n{}\n\n",
                position + 1,
                entry.name,
                entry.content
            ));
        }
        payload.push_str(BLOCK_DELIMITER);
        payload.push_str("\n\n");
    }

    payload.push_str(TARGET_HEADER);
    payload.push('\n');
    payload.push_str(BLOCK_DELIMITER);
    payload.push('\n');
    payload.push_str(target_text);
    payload.push('\n');
    payload.push_str(BLOCK_DELIMITER);
    payload
}
