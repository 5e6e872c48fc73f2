use async_trait::async_trait;
use polisher_ai_adapters::{
    AdapterResult, AiAdapterError, ApiTarget, ChatCompletionRequest, CompletionBackend,
    SnapshotSink,
};
use polisher_core::context::CONTEXT_HEADER;
use polisher_core::{
    ChatMessage, ClaimOutcome, HostBridge, HostEvents, InMemoryChat, InMemorySettings,
    MessageStore, MessageView, PolishError, PolisherService, PolisherSettings, SettingsHandle,
    StatusSink, StatusUpdate, POLISH_PLACEHOLDER,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Reply {
    Stream(Vec<&'static str>),
    /// Emits the deltas, then waits for cancellation.
    HangAfter(Vec<&'static str>),
    Complete(&'static str),
    Fail(AiAdapterError),
}

struct ScriptedBackend {
    reply: Reply,
    models: Vec<String>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    started: Notify,
}

impl ScriptedBackend {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            models: Vec::new(),
            requests: Mutex::new(Vec::new()),
            started: Notify::new(),
        }
    }

    fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: &ChatCompletionRequest) {
        self.requests.lock().unwrap().push(request.clone());
        self.started.notify_one();
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn list_models(&self, _target: &ApiTarget) -> AdapterResult<Vec<String>> {
        Ok(self.models.clone())
    }

    async fn send_completion(
        &self,
        _target: &ApiTarget,
        request: &ChatCompletionRequest,
        source_text: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<String> {
        self.record(request);
        match &self.reply {
            Reply::Stream(deltas) => Ok(deltas.concat()),
            Reply::HangAfter(_) => {
                cancel.cancelled().await;
                Err(AiAdapterError::Cancelled)
            }
            Reply::Complete(text) if text.is_empty() => Ok(source_text.to_string()),
            Reply::Complete(text) => Ok(text.to_string()),
            Reply::Fail(err) => Err(err.clone()),
        }
    }

    async fn stream_completion(
        &self,
        _target: &ApiTarget,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
        on_snapshot: SnapshotSink<'_>,
    ) -> AdapterResult<String> {
        self.record(request);
        match &self.reply {
            Reply::Stream(deltas) => {
                let mut text = String::new();
                for delta in deltas {
                    text.push_str(delta);
                    on_snapshot(&text);
                }
                Ok(text)
            }
            Reply::HangAfter(deltas) => {
                let mut text = String::new();
                for delta in deltas {
                    text.push_str(delta);
                    on_snapshot(&text);
                }
                cancel.cancelled().await;
                Err(AiAdapterError::Cancelled)
            }
            Reply::Complete(text) => {
                on_snapshot(*text);
                Ok(text.to_string())
            }
            Reply::Fail(err) => Err(err.clone()),
        }
    }
}

#[derive(Default)]
struct RecordingView {
    bodies: Mutex<Vec<(usize, String)>>,
}

impl RecordingView {
    fn bodies_for(&self, index: usize) -> Vec<String> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, html)| html.clone())
            .collect()
    }
}

impl MessageView for RecordingView {
    fn is_mounted(&self, _index: usize) -> bool {
        true
    }

    fn set_body_html(&self, index: usize, html: &str) {
        self.bodies.lock().unwrap().push((index, html.to_string()));
    }
}

struct RecordingEvents {
    render_notifications: bool,
    emitted: Mutex<Vec<usize>>,
}

impl HostEvents for RecordingEvents {
    fn emit_message_received(&self, index: usize) {
        self.emitted.lock().unwrap().push(index);
    }

    fn emits_render_notifications(&self) -> bool {
        self.render_notifications
    }
}

#[derive(Default)]
struct RecordingStatus {
    updates: Mutex<Vec<StatusUpdate>>,
    polishing: Mutex<Vec<bool>>,
}

impl RecordingStatus {
    fn messages(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.message.clone())
            .collect()
    }

    fn last(&self) -> StatusUpdate {
        self.updates.lock().unwrap().last().cloned().unwrap()
    }
}

impl StatusSink for RecordingStatus {
    fn show_status(&self, status: &StatusUpdate) {
        self.updates.lock().unwrap().push(status.clone());
    }

    fn set_polishing(&self, active: bool) {
        self.polishing.lock().unwrap().push(active);
    }
}

struct Harness {
    chat: Arc<InMemoryChat>,
    view: Arc<RecordingView>,
    events: Arc<RecordingEvents>,
    status: Arc<RecordingStatus>,
    backend: Arc<ScriptedBackend>,
    service: PolisherService,
}

fn harness_with(
    messages: Vec<ChatMessage>,
    settings: PolisherSettings,
    backend: ScriptedBackend,
    render_notifications: bool,
) -> Harness {
    let chat = Arc::new(InMemoryChat::new(messages));
    let view = Arc::new(RecordingView::default());
    let events = Arc::new(RecordingEvents {
        render_notifications,
        emitted: Mutex::new(Vec::new()),
    });
    let status = Arc::new(RecordingStatus::default());
    let backend = Arc::new(backend);

    let host = HostBridge {
        store: chat.clone(),
        view: view.clone(),
        events: events.clone(),
        status: status.clone(),
    };
    let settings = SettingsHandle::new(settings, Arc::new(InMemorySettings::default()));
    let service = PolisherService::new(backend.clone(), settings, host);

    Harness {
        chat,
        view,
        events,
        status,
        backend,
        service,
    }
}

fn harness(reply: Reply) -> Harness {
    harness_with(conversation(), enabled_settings(), ScriptedBackend::new(reply), true)
}

fn enabled_settings() -> PolisherSettings {
    PolisherSettings {
        enabled: true,
        api_key: "sk-test".to_string(),
        ..PolisherSettings::default()
    }
}

fn conversation() -> Vec<ChatMessage> {
    vec![
        ChatMessage::assistant("Aria", "Welcome, traveler."),
        ChatMessage::user("you", "hi"),
        ChatMessage::assistant("Aria", "rough reply"),
    ]
}

fn assert_reverted(h: &Harness, index: usize, original: &str) {
    let message = h.chat.message(index).unwrap();
    assert_eq!(message.text, original);
    assert!(message.is_assistant());
    assert!(!message.extra.claimed);
    assert!(!message.extra.processed);
    assert_eq!(message.extra.original_text.as_deref(), Some(original));
    assert_eq!(h.view.bodies_for(index).last().map(String::as_str), Some(original));
}

#[tokio::test]
async fn streamed_polish_publishes_cumulative_snapshots_and_settles_flags() {
    let h = harness(Reply::Stream(vec!["A", "B", "C"]));

    assert_eq!(h.service.on_message_received(2), ClaimOutcome::Claimed);
    let masked = h.chat.message(2).unwrap();
    assert!(masked.is_system());
    assert!(masked.text.is_empty());

    let report = h
        .service
        .on_message_rendered(2)
        .await
        .expect("polish succeeds")
        .expect("claimed message is polished");

    assert_eq!(report.text, "ABC");
    assert!(report.streamed);
    assert_eq!(report.snapshot_count, 3);
    assert!(report.attempt_id.starts_with("polish-"));
    assert_eq!(
        h.view.bodies_for(2),
        vec![POLISH_PLACEHOLDER, "A", "AB", "ABC", "ABC"]
    );

    let message = h.chat.message(2).unwrap();
    assert_eq!(message.text, "ABC");
    assert!(message.is_assistant());
    assert!(message.extra.processed);
    assert!(!message.extra.claimed);
    assert_eq!(message.extra.original_text.as_deref(), Some("rough reply"));

    assert_eq!(*h.events.emitted.lock().unwrap(), vec![2]);
    assert_eq!(*h.status.polishing.lock().unwrap(), vec![true, false]);
    assert!(h.status.messages().contains(&"Polishing...".to_string()));
    assert_eq!(h.status.last(), StatusUpdate::info("Polish complete"));
    assert!(h.chat.save_count() >= 1);

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].stream);
    let payload = &requests[0].messages[1].content;
    assert!(payload.contains("[#1 - Aria]\nWelcome, traveler."));
    assert!(payload.ends_with("---\nrough reply\n---"));
}

#[tokio::test]
async fn cancelled_attempt_restores_original_text() {
    let h = harness(Reply::HangAfter(vec!["partial"]));
    h.service.on_message_received(2);

    let (result, stopped) = tokio::join!(h.service.on_message_rendered(2), async {
        h.backend.started.notified().await;
        h.service.stop()
    });

    assert!(stopped);
    assert_eq!(result, Err(PolishError::Cancelled));
    assert_reverted(&h, 2, "rough reply");
    assert!(h.view.bodies_for(2).contains(&"partial".to_string()));
    assert!(h.events.emitted.lock().unwrap().is_empty());
    assert_eq!(h.status.last(), StatusUpdate::info("Polish stopped"));
    assert!(!h.service.is_polishing());
}

#[tokio::test]
async fn unauthorized_reply_reverts_and_leaves_message_retryable() {
    let h = harness(Reply::Fail(AiAdapterError::Api {
        status: 401,
        body: "invalid api key".to_string(),
    }));
    h.service.on_message_received(2);

    let result = h.service.on_message_rendered(2).await;

    assert!(matches!(result, Err(PolishError::Api { status: 401, .. })));
    assert_reverted(&h, 2, "rough reply");
    let last = h.status.last();
    assert!(last.is_error());
    assert!(last.message.starts_with("Polish failed:"));
    assert!(h.events.emitted.lock().unwrap().is_empty());

    assert_eq!(h.service.on_message_received(2), ClaimOutcome::Claimed);
}

#[tokio::test]
async fn transport_failure_reverts_and_frees_the_slot() {
    let h = harness(Reply::Fail(AiAdapterError::Transport(
        "connection reset".to_string(),
    )));
    h.service.on_message_received(2);

    let result = h.service.on_message_rendered(2).await;

    assert_eq!(
        result,
        Err(PolishError::Unexpected("connection reset".to_string()))
    );
    assert_reverted(&h, 2, "rough reply");
    assert!(h.status.last().is_error());
    assert!(h.events.emitted.lock().unwrap().is_empty());
    assert!(!h.service.is_polishing());
    assert_eq!(*h.status.polishing.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn dropping_an_attempt_mid_stream_reverts_the_message() {
    let h = harness(Reply::HangAfter(vec!["half a"]));
    h.service.on_message_received(2);

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        h.service.on_message_rendered(2),
    )
    .await;

    assert!(outcome.is_err());
    assert!(h.view.bodies_for(2).contains(&"half a".to_string()));
    assert_reverted(&h, 2, "rough reply");
    assert!(!h.service.is_polishing());
    assert_eq!(*h.status.polishing.lock().unwrap(), vec![true, false]);
    assert!(h.events.emitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stop_during_render_settle_prevents_the_request() {
    let settings = PolisherSettings {
        render_settle_ms: 10_000,
        ..enabled_settings()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::HangAfter(vec!["never"])),
        false,
    );

    let (result, stopped) = tokio::join!(h.service.handle_new_message(2), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.service.stop()
    });

    assert!(stopped);
    assert_eq!(result, Err(PolishError::Cancelled));
    assert!(h.backend.requests().is_empty());
    let message = h.chat.message(2).unwrap();
    assert_eq!(message.text, "rough reply");
    assert!(message.is_assistant());
    assert!(!message.extra.claimed);
    assert!(!message.extra.processed);
    assert!(!h.service.is_polishing());
    assert_eq!(h.status.last(), StatusUpdate::info("Polish stopped"));

    // Nothing pending any more, and later attempts are not pre-cancelled.
    assert!(!h.service.stop());
}

#[tokio::test]
async fn stop_without_pending_work_does_not_cancel_the_next_settle() {
    let settings = PolisherSettings {
        render_settle_ms: 5,
        ..enabled_settings()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::Stream(vec!["A", "B"])),
        false,
    );

    assert!(!h.service.stop());
    let report = h.service.handle_new_message(2).await.unwrap();

    assert_eq!(report.map(|r| r.text), Some("AB".to_string()));
}

#[tokio::test]
async fn second_attempt_is_rejected_without_side_effects() {
    let mut messages = conversation();
    messages.push(ChatMessage::user("you", "more"));
    messages.push(ChatMessage::assistant("Aria", "another reply"));
    let h = harness_with(
        messages,
        enabled_settings(),
        ScriptedBackend::new(Reply::HangAfter(vec!["first"])),
        true,
    );
    h.service.on_message_received(2);

    let (first, _) = tokio::join!(h.service.on_message_rendered(2), async {
        h.backend.started.notified().await;
        let before = h.chat.messages();

        let manual = h.service.manual_polish().await;
        assert_eq!(manual, Err(PolishError::Busy));
        assert_eq!(h.chat.messages(), before);
        assert_eq!(
            h.status.last(),
            StatusUpdate::error("A polish is already running, please wait")
        );

        // A claim that reaches render while busy is released, not queued.
        assert_eq!(h.service.on_message_received(4), ClaimOutcome::Claimed);
        assert_eq!(h.service.on_message_rendered(4).await, Ok(None));
        let released = h.chat.message(4).unwrap();
        assert_eq!(released.text, "another reply");
        assert!(released.is_assistant());
        assert!(!released.extra.processed);

        assert_eq!(h.chat.message(2).unwrap().text, "first");
        h.service.stop();
    });

    assert_eq!(first, Err(PolishError::Cancelled));
    assert_eq!(h.backend.requests().len(), 1);
}

#[tokio::test]
async fn arrival_on_processed_message_is_idempotent() {
    let mut messages = conversation();
    messages[2].extra.processed = true;
    messages[2].extra.original_text = Some("older draft".to_string());
    let h = harness_with(
        messages,
        enabled_settings(),
        ScriptedBackend::new(Reply::Stream(vec!["X"])),
        true,
    );
    let before = h.chat.messages();

    assert_eq!(h.service.on_message_received(2), ClaimOutcome::AlreadyProcessed);
    assert_eq!(h.service.on_message_received(2), ClaimOutcome::AlreadyProcessed);
    assert_eq!(h.service.on_message_rendered(2).await, Ok(None));
    assert_eq!(h.chat.messages(), before);
    assert!(h.backend.requests().is_empty());
}

#[tokio::test]
async fn missing_credentials_fail_before_any_request() {
    let settings = PolisherSettings {
        enabled: true,
        ..PolisherSettings::default()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::Stream(vec!["A"])),
        true,
    );
    h.service.on_message_received(2);

    let result = h.service.on_message_rendered(2).await;

    assert!(matches!(result, Err(PolishError::Config(_))));
    assert!(h.backend.requests().is_empty());
    assert_eq!(h.view.bodies_for(2), vec!["rough reply"]);
    assert_reverted(&h, 2, "rough reply");
}

#[tokio::test]
async fn pre_existing_system_message_is_left_alone() {
    let mut messages = conversation();
    messages.push(ChatMessage::system("narrator", "The scene shifts."));
    let h = harness_with(
        messages,
        enabled_settings(),
        ScriptedBackend::new(Reply::Stream(vec!["A"])),
        true,
    );
    let before = h.chat.messages();

    assert_eq!(h.service.on_message_received(3), ClaimOutcome::Ineligible);
    assert_eq!(h.service.on_message_rendered(3).await, Ok(None));
    assert_eq!(h.chat.messages(), before);
    assert!(h.view.bodies_for(3).is_empty());
}

#[tokio::test]
async fn disabled_service_ignores_arrival_and_releases_stale_claims() {
    let h = harness(Reply::Stream(vec!["A"]));
    assert_eq!(h.service.on_message_received(2), ClaimOutcome::Claimed);

    h.service.set_enabled(false);
    assert_eq!(h.status.last(), StatusUpdate::info("Auto-polish disabled"));
    assert_eq!(h.service.on_message_rendered(2).await, Ok(None));

    let message = h.chat.message(2).unwrap();
    assert_eq!(message.text, "rough reply");
    assert!(message.is_assistant());
    assert!(!message.extra.claimed);
    assert_eq!(h.service.on_message_received(2), ClaimOutcome::Disabled);
    assert!(h.backend.requests().is_empty());
}

#[tokio::test]
async fn non_streaming_publishes_and_persists_once() {
    let settings = PolisherSettings {
        stream_enabled: false,
        ..enabled_settings()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::Complete("Polished reply.")),
        true,
    );
    h.service.on_message_received(2);

    let report = h.service.on_message_rendered(2).await.unwrap().unwrap();

    assert!(!report.streamed);
    assert_eq!(report.snapshot_count, 0);
    assert_eq!(
        h.view.bodies_for(2),
        vec![POLISH_PLACEHOLDER, "Polished reply."]
    );
    assert!(!h.backend.requests()[0].stream);
    assert!(h.chat.message(2).unwrap().extra.processed);
}

#[tokio::test]
async fn late_claim_polishes_a_message_whose_arrival_was_missed() {
    let settings = PolisherSettings {
        show_placeholder: false,
        ..enabled_settings()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::Stream(vec!["Better", " reply"])),
        true,
    );

    let report = h.service.on_message_rendered(2).await.unwrap().unwrap();

    assert_eq!(report.text, "Better reply");
    assert_eq!(h.view.bodies_for(2), vec!["Better", "Better reply", "Better reply"]);
    let message = h.chat.message(2).unwrap();
    assert!(message.extra.processed);
    assert_eq!(message.extra.original_text.as_deref(), Some("rough reply"));
}

#[tokio::test]
async fn manual_polish_resumes_from_preserved_original() {
    let mut messages = conversation();
    messages[2].text = "earlier polish".to_string();
    messages[2].extra.processed = true;
    messages[2].extra.original_text = Some("rough reply".to_string());
    let h = harness_with(
        messages,
        enabled_settings(),
        ScriptedBackend::new(Reply::Stream(vec!["Fresh", " take"])),
        true,
    );

    let report = h.service.manual_polish().await.expect("manual polish succeeds");

    assert_eq!(report.text, "Fresh take");
    let payload = &h.backend.requests()[0].messages[1].content;
    assert!(payload.contains("rough reply"));
    assert!(!payload.contains("earlier polish"));
    assert!(!h.view.bodies_for(2).contains(&POLISH_PLACEHOLDER.to_string()));
    assert_eq!(
        h.chat.message(2).unwrap().extra.original_text.as_deref(),
        Some("rough reply")
    );
}

#[tokio::test]
async fn manual_polish_without_assistant_message_reports_status() {
    let h = harness_with(
        vec![ChatMessage::user("you", "hello?")],
        enabled_settings(),
        ScriptedBackend::new(Reply::Stream(vec!["A"])),
        true,
    );

    assert!(matches!(
        h.service.manual_polish().await,
        Err(PolishError::MessageNotFound(_))
    ));
    assert_eq!(
        h.status.last(),
        StatusUpdate::error("No assistant message to polish")
    );
}

#[tokio::test]
async fn zero_context_window_sends_no_context_block() {
    let settings = PolisherSettings {
        context_messages: 0,
        ..enabled_settings()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::Stream(vec!["A"])),
        true,
    );
    h.service.on_message_received(2);

    let report = h.service.on_message_rendered(2).await.unwrap().unwrap();

    assert_eq!(report.context_messages, 0);
    let payload = &h.backend.requests()[0].messages[1].content;
    assert!(!payload.contains(CONTEXT_HEADER));
    assert!(!payload.contains("Welcome, traveler."));
}

#[tokio::test]
async fn hosts_without_render_notifications_use_the_settle_delay() {
    let settings = PolisherSettings {
        render_settle_ms: 5,
        ..enabled_settings()
    };
    let h = harness_with(
        conversation(),
        settings,
        ScriptedBackend::new(Reply::Stream(vec!["A", "B"])),
        false,
    );

    let report = h.service.handle_new_message(2).await.unwrap();

    assert_eq!(report.map(|r| r.text), Some("AB".to_string()));
    assert!(h.chat.message(2).unwrap().extra.processed);
}

#[tokio::test]
async fn fetched_models_replace_an_unavailable_selection() {
    let mut backend = ScriptedBackend::new(Reply::Stream(vec!["A"]));
    backend.models = vec!["gpt-a".to_string(), "gpt-b".to_string()];
    let h = harness_with(conversation(), enabled_settings(), backend, true);

    let models = h.service.fetch_models().await.unwrap();

    assert_eq!(models, vec!["gpt-a", "gpt-b"]);
    let settings = h.service.settings().snapshot();
    assert_eq!(settings.model, "gpt-a");
    assert_eq!(settings.available_models, models);
    assert_eq!(h.status.last(), StatusUpdate::info("Fetched 2 models"));
}
