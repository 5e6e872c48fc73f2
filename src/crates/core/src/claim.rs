//! Message claim protocol
//!
//! A freshly arrived assistant message is masked with the system role and blanked before other
//! arrival observers act on it. The mask is lifted when the rewrite attempt ends, whatever the
//! outcome. Only messages carrying `claimed` are ever unmasked; a message that was already
//! system-classified is left alone.

use crate::host::MessageStore;
use crate::message::{ChatMessage, MessageRole};
use crate::presentation::Presenter;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
    AlreadyProcessed,
    /// Not assistant-authored, empty, or the first entry of the conversation.
    Ineligible,
    NotFound,
    /// Auto-polish is off; the message was not inspected.
    Disabled,
}

fn rejection(index: usize, message: &ChatMessage) -> Option<ClaimOutcome> {
    if message.extra.processed {
        Some(ClaimOutcome::AlreadyProcessed)
    } else if message.extra.claimed {
        Some(ClaimOutcome::AlreadyClaimed)
    } else if index == 0 || !message.is_assistant() || message.text.is_empty() {
        Some(ClaimOutcome::Ineligible)
    } else {
        None
    }
}

/// Whether an unclaimed message may be polished automatically.
pub fn is_eligible(index: usize, message: &ChatMessage) -> bool {
    rejection(index, message).is_none()
}

/// Snapshot the text into `originalText`, mark the message claimed, mask its role and blank it.
///
/// Eligibility is re-checked under the store's update so a concurrent claim cannot double-mask.
pub fn try_claim(store: &dyn MessageStore, index: usize) -> ClaimOutcome {
    let mut outcome = ClaimOutcome::NotFound;
    store.update(index, &mut |message| {
        outcome = match rejection(index, message) {
            Some(rejected) => rejected,
            None => {
                message.extra.original_text = Some(std::mem::take(&mut message.text));
                message.extra.claimed = true;
                message.role = MessageRole::System;
                ClaimOutcome::Claimed
            }
        };
    });

    debug!("Claim evaluated: message_index={}, outcome={:?}", index, outcome);
    outcome
}

/// Lift a claim without polishing: restore role and original text. Returns `false` when the
/// message was not claimed by us.
pub fn release_claim(store: &dyn MessageStore, index: usize) -> bool {
    let mut released = false;
    store.update(index, &mut |message| {
        if !message.extra.claimed {
            return;
        }
        if let Some(original) = &message.extra.original_text {
            message.text = original.clone();
        }
        unmask(message);
        released = true;
    });
    if released {
        store.save_chat_debounced();
    }
    released
}

fn unmask(message: &mut ChatMessage) {
    if message.extra.claimed {
        message.extra.claimed = false;
        message.role = MessageRole::Assistant;
    }
}

/// Scoped ownership of a message for the length of one attempt.
///
/// Must be settled exactly once. Dropping it unsettled reverts the message, so the mask is lifted
/// on every exit path including panics and dropped futures.
pub struct ClaimLease {
    presenter: Presenter,
    index: usize,
    original: String,
    settled: bool,
}

impl ClaimLease {
    pub fn new(presenter: Presenter, index: usize, original: impl Into<String>) -> Self {
        Self {
            presenter,
            index,
            original: original.into(),
            settled: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// Success: clear `claimed`, restore the role and mark the message processed.
    pub fn settle_completed(mut self) {
        self.settled = true;
        let store = self.presenter.store();
        store.update(self.index, &mut |message| {
            unmask(message);
            message.extra.processed = true;
        });
        store.save_chat_debounced();
    }

    /// Cancel or failure: put the original text back (visible and persisted) and lift the mask.
    pub fn settle_reverted(mut self) {
        self.settled = true;
        self.revert();
    }

    fn revert(&self) {
        self.presenter.store().update(self.index, &mut |message| {
            unmask(message);
        });
        self.presenter.publish(self.index, &self.original, true);
    }
}

impl Drop for ClaimLease {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "Claim lease dropped without settling, reverting: message_index={}",
                self.index
            );
            self.revert();
        }
    }
}
