//! The single in-flight attempt slot.

use super::types::PolishPhase;
use crate::host::StatusSink;
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
struct ActiveAttempt {
    id: String,
    cancel: CancellationToken,
    phase: PolishPhase,
}

/// At most one attempt holds the slot; a second acquisition fails instead of queueing.
#[derive(Debug, Default)]
pub struct AttemptSlot {
    active: Mutex<Option<ActiveAttempt>>,
}

impl AttemptSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveAttempt>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the slot. `None` while another guard is live; nothing is touched in that case.
    pub fn try_acquire(slot: &Arc<Self>, status: Arc<dyn StatusSink>) -> Option<AttemptGuard> {
        let (id, cancel) = {
            let mut active = slot.lock();
            if active.is_some() {
                return None;
            }
            let id = format!("polish-{}", Uuid::new_v4());
            let cancel = CancellationToken::new();
            *active = Some(ActiveAttempt {
                id: id.clone(),
                cancel: cancel.clone(),
                phase: PolishPhase::Preparing,
            });
            (id, cancel)
        };

        status.set_polishing(true);
        Some(AttemptGuard {
            slot: slot.clone(),
            status,
            id,
            cancel,
        })
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn phase(&self) -> PolishPhase {
        self.lock()
            .as_ref()
            .map(|attempt| attempt.phase)
            .unwrap_or_default()
    }

    pub fn active_id(&self) -> Option<String> {
        self.lock().as_ref().map(|attempt| attempt.id.clone())
    }

    /// Signal the live attempt's cancellation token. Returns whether one was live.
    pub fn cancel_active(&self) -> bool {
        match self.lock().as_ref() {
            Some(attempt) => {
                debug!("Cancelling polish attempt: attempt_id={}", attempt.id);
                attempt.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// Held for the lifetime of one attempt. Dropping it frees the slot and re-enables the manual
/// trigger.
pub struct AttemptGuard {
    slot: Arc<AttemptSlot>,
    status: Arc<dyn StatusSink>,
    id: String,
    cancel: CancellationToken,
}

impl AttemptGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_phase(&self, phase: PolishPhase) {
        if let Some(attempt) = self.slot.lock().as_mut() {
            if attempt.id == self.id {
                attempt.phase = phase;
            }
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        {
            let mut active = self.slot.lock();
            if active.as_ref().map(|a| a.id == self.id).unwrap_or(false) {
                *active = None;
            }
        }
        self.status.set_polishing(false);
        debug!("Polish attempt slot released: attempt_id={}", self.id);
    }
}
