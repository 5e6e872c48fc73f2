//! Polish orchestrator
//!
//! Drives one rewrite attempt end to end:
//! Idle -> Preparing -> Streaming | NonStreaming -> Finalizing -> Idle.
//! The attempt slot and the claim lease are both scoped resources, so finalization runs on every
//! exit path.

mod attempt;
mod types;

pub use attempt::{AttemptGuard, AttemptSlot};
pub use types::{AttemptOrigin, PolishPhase, PolishReport, PolishRequest};

use crate::claim::ClaimLease;
use crate::config::SettingsHandle;
use crate::context::{build_context_window, build_request_payload};
use crate::host::{HostBridge, StatusUpdate};
use crate::presentation::Presenter;
use crate::util::errors::{PolishError, PolishResult};
use chrono::Utc;
use log::{debug, error, info, warn};
use polisher_ai_adapters::{ChatCompletionRequest, ChatTurn, CompletionBackend};
use std::sync::Arc;

pub const POLISH_PLACEHOLDER: &str = "✨ Polishing...";
pub const STATUS_POLISHING: &str = "Polishing...";
pub const STATUS_COMPLETE: &str = "Polish complete";
pub const STATUS_STOPPED: &str = "Polish stopped";
pub const STATUS_BUSY: &str = "A polish is already running, please wait";

struct AttemptOutput {
    text: String,
    streamed: bool,
    snapshot_count: usize,
    context_messages: usize,
}

pub struct PolishOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    settings: SettingsHandle,
    host: HostBridge,
    presenter: Presenter,
    slot: Arc<AttemptSlot>,
}

impl PolishOrchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        settings: SettingsHandle,
        host: HostBridge,
    ) -> Self {
        let presenter = Presenter::new(host.store.clone(), host.view.clone());
        Self {
            backend,
            settings,
            host,
            presenter,
            slot: AttemptSlot::new(),
        }
    }

    pub fn slot(&self) -> &Arc<AttemptSlot> {
        &self.slot
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn is_polishing(&self) -> bool {
        self.slot.is_active()
    }

    pub fn phase(&self) -> PolishPhase {
        self.slot.phase()
    }

    /// Signal the live attempt to stop. Returns whether an attempt was live.
    pub fn stop(&self) -> bool {
        self.slot.cancel_active()
    }

    /// Run one attempt. A second call while one is live is rejected with `PolishError::Busy` and
    /// touches nothing but the status line.
    pub async fn polish(&self, request: PolishRequest) -> PolishResult<PolishReport> {
        let Some(guard) = AttemptSlot::try_acquire(&self.slot, self.host.status.clone()) else {
            warn!(
                "Polish rejected, another attempt is live: message_index={}",
                request.message_index
            );
            self.host.status.show_status(&StatusUpdate::error(STATUS_BUSY));
            return Err(PolishError::Busy);
        };

        let started_at_ms = Utc::now().timestamp_millis();
        let index = request.message_index;
        info!(
            "Polish attempt started: attempt_id={}, message_index={}, origin={:?}",
            guard.id(),
            index,
            request.origin
        );

        if self.host.store.message(index).is_none() {
            let err = PolishError::MessageNotFound(index);
            self.host
                .status
                .show_status(&StatusUpdate::error(format!("Polish failed: {}", err)));
            return Err(err);
        }

        let lease = ClaimLease::new(self.presenter.clone(), index, request.source_text.clone());
        self.presenter
            .ensure_original_text(index, &request.source_text);

        let result = self.run(&guard, &request).await;
        guard.set_phase(PolishPhase::Finalizing);

        match result {
            Ok(output) => {
                lease.settle_completed();
                self.host.status.show_status(&StatusUpdate::info(STATUS_COMPLETE));

                let report = PolishReport {
                    attempt_id: guard.id().to_string(),
                    message_index: index,
                    text: output.text,
                    streamed: output.streamed,
                    snapshot_count: output.snapshot_count,
                    context_messages: output.context_messages,
                    started_at_ms,
                    finished_at_ms: Utc::now().timestamp_millis(),
                };
                info!(
                    "Polish attempt completed: attempt_id={}, message_index={}, chars={}, snapshots={}, duration_ms={}",
                    report.attempt_id,
                    index,
                    report.text.chars().count(),
                    report.snapshot_count,
                    report.duration_ms()
                );

                // Free the slot before re-arrival so observers may start their own work.
                drop(guard);
                self.host.events.emit_message_received(index);
                Ok(report)
            }
            Err(err) if err.is_cancelled() => {
                lease.settle_reverted();
                info!(
                    "Polish attempt cancelled: attempt_id={}, message_index={}",
                    guard.id(),
                    index
                );
                self.host.status.show_status(&StatusUpdate::info(STATUS_STOPPED));
                Err(err)
            }
            Err(err) => {
                lease.settle_reverted();
                error!(
                    "Polish attempt failed: attempt_id={}, message_index={}, error={}",
                    guard.id(),
                    index,
                    err
                );
                self.host
                    .status
                    .show_status(&StatusUpdate::error(format!("Polish failed: {}", err)));
                Err(err)
            }
        }
    }

    async fn run(&self, guard: &AttemptGuard, request: &PolishRequest) -> PolishResult<AttemptOutput> {
        let index = request.message_index;
        let settings = self.settings.snapshot();
        let target = settings.api_target()?;

        if request.origin == AttemptOrigin::Fresh && settings.show_placeholder {
            self.presenter.publish(index, POLISH_PLACEHOLDER, false);
        }
        self.host.status.show_status(&StatusUpdate::info(STATUS_POLISHING));

        let history = self.host.store.messages();
        let context = build_context_window(&history, index, settings.context_messages as usize);
        let payload = build_request_payload(&request.source_text, &context);
        debug!(
            "Polish request assembled: attempt_id={}, context_messages={}, payload_chars={}",
            guard.id(),
            context.len(),
            payload.chars().count()
        );

        let completion = ChatCompletionRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatTurn::system(settings.system_prompt.clone()),
                ChatTurn::user(payload),
            ],
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            stream: settings.stream_enabled,
        };
        let cancel = guard.cancel_token();

        if settings.stream_enabled {
            guard.set_phase(PolishPhase::Streaming);
            let presenter = &self.presenter;
            let mut snapshot_count = 0usize;
            let mut on_snapshot = |snapshot: &str| {
                snapshot_count += 1;
                presenter.publish(index, snapshot, false);
            };
            let text = self
                .backend
                .stream_completion(&target, &completion, cancel, &mut on_snapshot)
                .await?;

            self.presenter.publish(index, &text, true);
            Ok(AttemptOutput {
                text,
                streamed: true,
                snapshot_count,
                context_messages: context.len(),
            })
        } else {
            guard.set_phase(PolishPhase::NonStreaming);
            let text = self
                .backend
                .send_completion(&target, &completion, &request.source_text, cancel)
                .await?;

            self.presenter.publish(index, &text, true);
            Ok(AttemptOutput {
                text,
                streamed: false,
                snapshot_count: 0,
                context_messages: context.len(),
            })
        }
    }
}
