//! Polisher service
//!
//! The facade a host embeds: the arrival and rendered inbound ports plus the control surface
//! (enable toggle, manual trigger, stop, model listing, prompt reset).

use crate::claim::{is_eligible, release_claim, try_claim, ClaimOutcome};
use crate::config::{SettingsHandle, DEFAULT_SYSTEM_PROMPT};
use crate::host::{HostBridge, StatusUpdate};
use crate::orchestrator::{
    PolishOrchestrator, PolishPhase, PolishReport, PolishRequest, STATUS_BUSY, STATUS_STOPPED,
};
use crate::util::errors::{PolishError, PolishResult};
use log::{debug, info, warn};
use polisher_ai_adapters::CompletionBackend;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const STATUS_NO_MESSAGE: &str = "No assistant message to polish";
pub const STATUS_ENABLED: &str = "Auto-polish enabled";
pub const STATUS_DISABLED: &str = "Auto-polish disabled";
pub const STATUS_PROMPT_RESET: &str = "System prompt reset to default";

/// Render-settle waits that have not reached the orchestrator yet.
#[derive(Default)]
struct SettleWaits {
    cancel: CancellationToken,
    pending: usize,
}

/// Counts one pending wait; the count drops even when the waiting future is dropped.
struct SettleTicket<'a> {
    waits: &'a Mutex<SettleWaits>,
}

impl Drop for SettleTicket<'_> {
    fn drop(&mut self) {
        let mut waits = self.waits.lock().unwrap_or_else(PoisonError::into_inner);
        waits.pending = waits.pending.saturating_sub(1);
    }
}

pub struct PolisherService {
    orchestrator: PolishOrchestrator,
    backend: Arc<dyn CompletionBackend>,
    settings: SettingsHandle,
    host: HostBridge,
    settle_waits: Mutex<SettleWaits>,
}

impl PolisherService {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        settings: SettingsHandle,
        host: HostBridge,
    ) -> Self {
        let orchestrator = PolishOrchestrator::new(backend.clone(), settings.clone(), host.clone());
        Self {
            orchestrator,
            backend,
            settings,
            host,
            settle_waits: Mutex::new(SettleWaits::default()),
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn is_polishing(&self) -> bool {
        self.orchestrator.is_polishing()
    }

    pub fn phase(&self) -> PolishPhase {
        self.orchestrator.phase()
    }

    /// Arrival inbound port. Claims an eligible assistant message before other observers see it.
    pub fn on_message_received(&self, index: usize) -> ClaimOutcome {
        if !self.settings.snapshot().enabled {
            return ClaimOutcome::Disabled;
        }
        try_claim(self.host.store.as_ref(), index)
    }

    /// Rendered inbound port. Polishes a claimed message from its preserved original text, or an
    /// eligible message whose arrival was missed from its live text.
    ///
    /// Returns `Ok(None)` when nothing was polished.
    pub async fn on_message_rendered(&self, index: usize) -> PolishResult<Option<PolishReport>> {
        let Some(message) = self.host.store.message(index) else {
            return Ok(None);
        };
        let enabled = self.settings.snapshot().enabled;

        if message.extra.claimed {
            let source = message.extra.original_text.clone().unwrap_or_default();
            if !enabled || self.is_polishing() || source.is_empty() {
                debug!(
                    "Releasing claim without polishing: message_index={}, enabled={}, busy={}",
                    index,
                    enabled,
                    self.is_polishing()
                );
                release_claim(self.host.store.as_ref(), index);
                return Ok(None);
            }
            return self.polish_claimed(index, source).await;
        }

        if !enabled || self.is_polishing() || !is_eligible(index, &message) {
            return Ok(None);
        }

        debug!("Late claim at render: message_index={}", index);
        self.orchestrator
            .polish(PolishRequest::fresh(index, message.text))
            .await
            .map(Some)
    }

    async fn polish_claimed(
        &self,
        index: usize,
        source: String,
    ) -> PolishResult<Option<PolishReport>> {
        match self
            .orchestrator
            .polish(PolishRequest::fresh(index, source))
            .await
        {
            Ok(report) => Ok(Some(report)),
            Err(PolishError::Busy) => {
                release_claim(self.host.store.as_ref(), index);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Fallback for hosts without a rendered notification: wait for rendering to settle, then
    /// run the rendered handler.
    ///
    /// `stop()` during the wait releases the claim and returns `PolishError::Cancelled`.
    pub async fn render_after_settle(&self, index: usize) -> PolishResult<Option<PolishReport>> {
        let delay = Duration::from_millis(self.settings.snapshot().render_settle_ms);
        let (cancel, ticket) = self.enter_settle_wait();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Polish stopped before it started: message_index={}", index);
                release_claim(self.host.store.as_ref(), index);
                self.host.status.show_status(&StatusUpdate::info(STATUS_STOPPED));
                return Err(PolishError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        drop(ticket);
        self.on_message_rendered(index).await
    }

    fn enter_settle_wait(&self) -> (CancellationToken, SettleTicket<'_>) {
        let mut waits = self
            .settle_waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        waits.pending += 1;
        let cancel = waits.cancel.clone();
        (
            cancel,
            SettleTicket {
                waits: &self.settle_waits,
            },
        )
    }

    fn cancel_settle_waits(&self) -> bool {
        let mut waits = self
            .settle_waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if waits.pending == 0 {
            return false;
        }
        let cancelled = std::mem::take(&mut waits.cancel);
        cancelled.cancel();
        true
    }

    /// Arrival followed by rendering, using the settle delay when the host has no rendered
    /// notification of its own.
    pub async fn handle_new_message(&self, index: usize) -> PolishResult<Option<PolishReport>> {
        let outcome = self.on_message_received(index);
        debug!("Arrival handled: message_index={}, outcome={:?}", index, outcome);
        if self.host.events.emits_render_notifications() {
            return Ok(None);
        }
        self.render_after_settle(index).await
    }

    /// Polish the last assistant message, starting from its preserved original text when present.
    pub async fn manual_polish(&self) -> PolishResult<PolishReport> {
        if self.is_polishing() {
            self.host.status.show_status(&StatusUpdate::error(STATUS_BUSY));
            return Err(PolishError::Busy);
        }

        let messages = self.host.store.messages();
        match messages
            .iter()
            .rposition(|m| m.is_assistant() && !m.text.is_empty())
        {
            Some(index) => self.polish_message(index).await,
            None => {
                self.host
                    .status
                    .show_status(&StatusUpdate::error(STATUS_NO_MESSAGE));
                Err(PolishError::MessageNotFound(messages.len()))
            }
        }
    }

    /// Manually polish one assistant message regardless of the auto-polish toggle.
    ///
    /// A message that already carries `originalText` is re-polished from it as a resumed attempt.
    pub async fn polish_message(&self, index: usize) -> PolishResult<PolishReport> {
        if self.is_polishing() {
            self.host.status.show_status(&StatusUpdate::error(STATUS_BUSY));
            return Err(PolishError::Busy);
        }

        let message = self
            .host
            .store
            .message(index)
            .filter(|m| m.is_assistant() && !m.text.is_empty());
        let Some(message) = message else {
            self.host
                .status
                .show_status(&StatusUpdate::error(STATUS_NO_MESSAGE));
            return Err(PolishError::MessageNotFound(index));
        };

        let request = match message.extra.original_text {
            Some(original) => PolishRequest::resumed(index, original),
            None => PolishRequest::fresh(index, message.text),
        };
        info!(
            "Manual polish requested: message_index={}, origin={:?}",
            index, request.origin
        );
        self.orchestrator.polish(request).await
    }

    /// Stop the live attempt and any attempt still waiting for rendering to settle. Returns
    /// whether anything was stopped.
    pub fn stop(&self) -> bool {
        let waiting = self.cancel_settle_waits();
        self.orchestrator.stop() || waiting
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.update(|s| s.enabled = enabled);
        let message = if enabled {
            STATUS_ENABLED
        } else {
            STATUS_DISABLED
        };
        self.host.status.show_status(&StatusUpdate::info(message));
    }

    pub fn reset_system_prompt(&self) {
        self.settings
            .update(|s| s.system_prompt = DEFAULT_SYSTEM_PROMPT.to_string());
        self.host
            .status
            .show_status(&StatusUpdate::info(STATUS_PROMPT_RESET));
    }

    /// Fetch the provider's model list into `availableModels`. Selects the first model when the
    /// configured one is not offered.
    pub async fn fetch_models(&self) -> PolishResult<Vec<String>> {
        let result = self.list_models().await;
        match &result {
            Ok(models) => self.host.status.show_status(&StatusUpdate::info(format!(
                "Fetched {} models",
                models.len()
            ))),
            Err(err) => {
                warn!("Failed to fetch model list: {}", err);
                self.host.status.show_status(&StatusUpdate::error(format!(
                    "Failed to fetch models: {}",
                    err
                )));
            }
        }
        result
    }

    async fn list_models(&self) -> PolishResult<Vec<String>> {
        let target = self.settings.snapshot().api_target()?;
        let models = self.backend.list_models(&target).await?;

        self.settings.update(|s| {
            if !models.contains(&s.model) {
                if let Some(first) = models.first() {
                    info!(
                        "Configured model not offered, selecting first: previous={}, selected={}",
                        s.model, first
                    );
                    s.model = first.clone();
                }
            }
            s.available_models = models.clone();
        });
        Ok(models)
    }
}
