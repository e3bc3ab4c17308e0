use super::*;
use std::time::Duration;

use serde_json::json;
use time::macros::date;
use tokio::sync::Notify;

use crate::message::MessageKind;
use crate::test_helpers::{MockAudioSource, MockBackend, logged_in_session, logged_out_session};
use crate::transport::TextReply;

fn chat_with(backend: Arc<MockBackend>, session: Arc<Session>) -> ChatViewModel {
    ChatViewModel::new(backend, session, Arc::new(MockAudioSource::unavailable()), "+911234567890")
}

fn chat(backend: Arc<MockBackend>) -> ChatViewModel {
    chat_with(backend, logged_in_session())
}

fn texts(vm: &ChatViewModel) -> Vec<String> {
    vm.snapshot().iter().filter_map(|m| m.text().map(str::to_owned)).collect()
}

fn last_text(vm: &ChatViewModel) -> String {
    vm.snapshot().last().and_then(Message::text).unwrap_or_default().to_owned()
}

fn bill() -> ImageRef {
    ImageRef { file_name: "bill.jpg".into(), mime: "image/jpeg".into(), bytes: Arc::from(vec![0xFF, 0xD8, 0xFF]) }
}

fn confirmation_id(vm: &ChatViewModel) -> MessageId {
    vm.snapshot().iter().find(|m| m.is_confirmation()).map(|m| m.id).unwrap()
}

async fn wait_until(vm: &ChatViewModel, predicate: impl Fn(&ChatViewModel) -> bool) {
    let mut changes = vm.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate(vm) {
            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

// =========================================================================
// Greeting + text
// =========================================================================

#[test]
fn fresh_chat_starts_with_greeting() {
    let vm = chat(Arc::new(MockBackend::new()));
    let log = vm.snapshot();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].origin, Origin::Assistant);
    assert_eq!(log[0].text(), Some(GREETING));
    assert!(!vm.is_busy());
    assert_eq!(vm.voice_state(), VoiceState::Idle);
}

#[tokio::test]
async fn blank_text_is_ignored() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_text("   \n\t").await;
    assert_eq!(vm.snapshot().len(), 1);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn text_exchange_appends_user_then_reply() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_text("how much did I spend?").await;

    let log = vm.snapshot();
    assert_eq!(log.len(), 3);
    assert_eq!(log[1].origin, Origin::User);
    assert_eq!(log[1].text(), Some("how much did I spend?"));
    assert_eq!(log[2].origin, Origin::Assistant);
    assert_eq!(log[2].text(), Some("echo: how much did I spend?"));
    assert_eq!(backend.calls(), vec!["send_text:how much did I spend?"]);
    assert!(!vm.is_busy());
}

#[tokio::test]
async fn recorded_expense_reply_shows_its_summary() {
    let reply = TextReply {
        status: Some("ok".into()),
        summary: "Expense recorded: tea for 20.0".into(),
        ..TextReply::default()
    };
    let vm = chat(Arc::new(MockBackend::new().with_text_reply(reply)));
    vm.submit_text("spent 20 on tea").await;
    assert_eq!(texts(&vm), vec![GREETING, "spent 20 on tea", "Expense recorded: tea for 20.0"]);
}

#[tokio::test]
async fn reply_without_text_is_reported_as_a_failure() {
    let reply = TextReply { text: "  ".into(), ..TextReply::default() };
    let vm = chat(Arc::new(MockBackend::new().with_text_reply(reply)));
    vm.submit_text("hello").await;
    assert_eq!(vm.snapshot().len(), 3);
    assert_eq!(last_text(&vm), "An unexpected error occurred. Please try again.");
}

#[tokio::test]
async fn summary_command_fetches_summary_card() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_text("📊 Monthly Summary").await;

    assert_eq!(backend.calls(), vec!["monthly_summary"]);
    let log = vm.snapshot();
    assert_eq!(log[1].text(), Some("📊 Monthly Summary"));
    match &log[2].kind {
        MessageKind::Summary(summary) => assert_eq!(summary.title, "Monthly Summary for November 2025"),
        other => panic!("expected summary, got {other:?}"),
    }
}

#[tokio::test]
async fn summary_command_ignores_case_and_punctuation() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_text("  monthly   SUMMARY! ").await;
    assert_eq!(backend.calls(), vec!["monthly_summary"]);
}

#[tokio::test]
async fn summary_failure_appends_failure_text() {
    let backend = Arc::new(MockBackend::failing(vec![TransportError::ServiceUnavailable(String::new())]));
    let vm = chat(backend);
    vm.submit_text("monthly summary").await;
    assert_eq!(last_text(&vm), "A required service is unavailable. Please try again later.");
}

#[tokio::test]
async fn text_failures_map_to_class_texts() {
    let cases = [
        (TransportError::Server { status: 500, body: String::new() }, "Server error: 500. Please try again."),
        (TransportError::Network("refused".into()), "Network error. Could not connect to the server."),
        (TransportError::Decode("bad".into()), "An unexpected error occurred. Please try again."),
    ];
    for (error, expected) in cases {
        let vm = chat(Arc::new(MockBackend::failing(vec![error])));
        vm.submit_text("hi").await;
        assert_eq!(vm.snapshot().len(), 3);
        assert_eq!(last_text(&vm), expected);
        assert!(!vm.is_busy());
    }
}

#[tokio::test]
async fn unauthorized_reply_logs_out() {
    let session = logged_in_session();
    let vm = chat_with(Arc::new(MockBackend::failing(vec![TransportError::Unauthorized])), session.clone());
    vm.submit_text("hi").await;
    assert!(!session.is_authenticated());
    assert_eq!(last_text(&vm), "Authentication failed. Please log in again.");
}

#[tokio::test]
async fn missing_credential_fails_without_a_call() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat_with(backend.clone(), logged_out_session());
    vm.submit_text("hi").await;
    assert!(backend.calls().is_empty());
    assert_eq!(texts(&vm), vec![GREETING, "hi", "Authentication failed. Please log in again."]);
}

// =========================================================================
// Busy indicator
// =========================================================================

#[tokio::test]
async fn busy_while_exchange_outstanding() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend::new().gated(gate.clone()));
    let vm = Arc::new(chat(backend));

    let task = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_text("slow").await }
    });
    wait_until(&vm, ChatViewModel::is_busy).await;
    assert_eq!(vm.snapshot().len(), 2);

    gate.notify_one();
    task.await.unwrap();
    assert!(!vm.is_busy());
    assert_eq!(last_text(&vm), "echo: slow");
}

#[tokio::test]
async fn busy_stays_set_until_last_overlapping_exchange_finishes() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend::new().gated(gate.clone()));
    let vm = Arc::new(chat(backend));

    let first = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_text("one").await }
    });
    let second = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_text("two").await }
    });
    wait_until(&vm, |vm| vm.snapshot().len() == 3).await;

    gate.notify_one();
    wait_until(&vm, |vm| vm.snapshot().len() == 4).await;
    assert!(vm.is_busy());

    gate.notify_one();
    first.await.unwrap();
    second.await.unwrap();
    assert!(!vm.is_busy());
    assert_eq!(vm.snapshot().len(), 5);
}

#[tokio::test]
async fn replies_land_in_completion_order() {
    let (one, two) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let backend = MockBackend::new().gated_on("one", one.clone()).gated_on("two", two.clone());
    let vm = Arc::new(chat(Arc::new(backend)));

    let first = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_text("one").await }
    });
    wait_until(&vm, |vm| vm.snapshot().len() == 2).await;
    let second = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_text("two").await }
    });
    wait_until(&vm, |vm| vm.snapshot().len() == 3).await;

    two.notify_one();
    second.await.unwrap();
    assert_eq!(last_text(&vm), "echo: two");
    assert!(vm.is_busy());

    one.notify_one();
    first.await.unwrap();
    assert_eq!(texts(&vm), vec![GREETING, "one", "two", "echo: two", "echo: one"]);
    let ids: Vec<_> = vm.snapshot().iter().map(|m| m.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(!vm.is_busy());
}

#[tokio::test]
async fn subscribers_see_every_append() {
    let vm = chat(Arc::new(MockBackend::new()));
    let mut changes = vm.subscribe();
    vm.submit_text("hi").await;
    assert!(changes.has_changed().unwrap());
    changes.mark_unchanged();
    assert!(!changes.has_changed().unwrap());
}

// =========================================================================
// Images + confirmation
// =========================================================================

#[tokio::test]
async fn image_upload_appends_preview_then_confirmation() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_image(bill()).await;

    let log = vm.snapshot();
    assert_eq!(log.len(), 3);
    assert!(matches!(&log[1].kind, MessageKind::Image(image) if image.file_name == "bill.jpg"));
    assert_eq!(log[1].origin, Origin::User);
    assert!(log[2].is_confirmation());
    assert_eq!(backend.calls(), vec!["send_image:bill.jpg"]);
    assert_eq!(vm.pending_upload(), None);
    assert!(!vm.is_busy());
}

#[tokio::test]
async fn pending_upload_is_set_during_upload() {
    let gate = Arc::new(Notify::new());
    let vm = Arc::new(chat(Arc::new(MockBackend::new().gated(gate.clone()))));

    let task = tokio::spawn({
        let vm = vm.clone();
        async move { vm.submit_image(bill()).await }
    });
    wait_until(&vm, |vm| vm.pending_upload().is_some()).await;
    assert_eq!(vm.pending_upload().as_deref(), Some("bill.jpg"));
    assert!(vm.is_busy());

    gate.notify_one();
    task.await.unwrap();
    assert_eq!(vm.pending_upload(), None);
    assert!(!vm.is_busy());
}

#[tokio::test]
async fn overlapping_uploads_keep_the_one_still_running() {
    let (first_gate, second_gate) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let backend = MockBackend::new().gated_on("a.jpg", first_gate.clone()).gated_on("b.jpg", second_gate.clone());
    let vm = Arc::new(chat(Arc::new(backend)));
    let image = |name: &str| ImageRef { file_name: name.into(), ..bill() };

    let first = tokio::spawn({
        let vm = vm.clone();
        let image = image("a.jpg");
        async move { vm.submit_image(image).await }
    });
    wait_until(&vm, |vm| vm.pending_upload().as_deref() == Some("a.jpg")).await;
    let second = tokio::spawn({
        let vm = vm.clone();
        let image = image("b.jpg");
        async move { vm.submit_image(image).await }
    });
    wait_until(&vm, |vm| vm.pending_upload().as_deref() == Some("b.jpg")).await;

    first_gate.notify_one();
    first.await.unwrap();
    assert_eq!(vm.pending_upload().as_deref(), Some("b.jpg"));
    assert!(vm.is_busy());

    second_gate.notify_one();
    second.await.unwrap();
    assert_eq!(vm.pending_upload(), None);
    assert!(!vm.is_busy());
}

#[tokio::test]
async fn image_failure_uses_image_texts() {
    let vm = chat(Arc::new(MockBackend::failing(vec![TransportError::ServiceUnavailable(String::new())])));
    vm.submit_image(bill()).await;
    assert_eq!(last_text(&vm), "An image processing service is unavailable. Please try again later.");

    let vm = chat(Arc::new(MockBackend::failing(vec![TransportError::Server { status: 422, body: String::new() }])));
    vm.submit_image(bill()).await;
    assert_eq!(last_text(&vm), "Server error: 422. Failed to process image.");
    assert!(vm.snapshot().iter().all(|m| !m.is_confirmation()));
}

#[tokio::test]
async fn confirm_records_expense_and_removes_card() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_image(bill()).await;
    let id = confirmation_id(&vm);

    vm.resolve_confirmation(id, ConfirmAction::Confirm).await;

    assert!(vm.snapshot().iter().all(|m| !m.is_confirmation()));
    assert_eq!(last_text(&vm), CONFIRMED_TEXT);
    let confirmed = backend.confirmed.lock().unwrap().clone();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].item, "Acme Traders");
    assert!((confirmed[0].amount - 1250.0).abs() < f64::EPSILON);
    assert_eq!(confirmed[0].date, "2024-03-01");
}

#[tokio::test]
async fn resolving_twice_is_a_no_op() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_image(bill()).await;
    let id = confirmation_id(&vm);

    vm.resolve_confirmation(id, ConfirmAction::Confirm).await;
    let after_first = vm.snapshot();
    vm.resolve_confirmation(id, ConfirmAction::Confirm).await;
    vm.resolve_confirmation(id, ConfirmAction::Retry).await;

    assert_eq!(vm.snapshot(), after_first);
    assert_eq!(backend.confirmed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn retry_cancels_without_network_call() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_image(bill()).await;
    let id = confirmation_id(&vm);

    vm.resolve_confirmation(id, ConfirmAction::Retry).await;

    assert_eq!(last_text(&vm), CANCELLED_TEXT);
    assert_eq!(backend.calls(), vec!["send_image:bill.jpg"]);
}

#[tokio::test]
async fn resolving_a_text_message_does_nothing() {
    let vm = chat(Arc::new(MockBackend::new()));
    let greeting = vm.snapshot()[0].id;
    vm.resolve_confirmation(greeting, ConfirmAction::Confirm).await;
    assert_eq!(texts(&vm), vec![GREETING]);
}

#[tokio::test]
async fn confirm_without_date_uses_today() {
    let fields = json!({ "Vendor": "Chai Point", "Total Amount": 40 }).as_object().cloned().unwrap();
    let backend = Arc::new(MockBackend::new().with_extracted(fields));
    let vm = chat(backend.clone()).with_today(|| date!(2025 - 11 - 07));
    vm.submit_image(bill()).await;
    vm.resolve_confirmation(confirmation_id(&vm), ConfirmAction::Confirm).await;
    assert_eq!(backend.confirmed.lock().unwrap()[0].date, "2025-11-07");
}

#[tokio::test]
async fn confirm_with_unusable_fields_short_circuits() {
    let fields = json!({ "Vendor": "Chai Point" }).as_object().cloned().unwrap();
    let backend = Arc::new(MockBackend::new().with_extracted(fields));
    let vm = chat(backend.clone());
    vm.submit_image(bill()).await;
    vm.resolve_confirmation(confirmation_id(&vm), ConfirmAction::Confirm).await;

    assert!(last_text(&vm).starts_with("Could not record the expense"));
    assert!(!backend.calls().iter().any(|c| c == "confirm_expense"));
}

#[tokio::test]
async fn confirm_failure_appends_failure_text() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.submit_image(bill()).await;
    backend.fail_next(TransportError::Network("down".into()));
    vm.resolve_confirmation(confirmation_id(&vm), ConfirmAction::Confirm).await;
    assert_eq!(last_text(&vm), "Network error. Could not connect to the server.");
}

#[test]
fn confirm_action_labels() {
    assert_eq!(ConfirmAction::from_label("confirm"), ConfirmAction::Confirm);
    assert_eq!(ConfirmAction::from_label(" Confirm "), ConfirmAction::Confirm);
    assert_eq!(ConfirmAction::from_label("retry"), ConfirmAction::Retry);
    assert_eq!(ConfirmAction::from_label("anything"), ConfirmAction::Retry);
}

// =========================================================================
// Voice
// =========================================================================

fn voice_chat(backend: Arc<MockBackend>, audio: Arc<MockAudioSource>) -> ChatViewModel {
    ChatViewModel::new(backend, logged_in_session(), audio, "+911234567890")
}

#[tokio::test]
async fn unavailable_microphone_appends_one_failure_and_stays_idle() {
    let backend = Arc::new(MockBackend::new());
    let vm = voice_chat(backend.clone(), Arc::new(MockAudioSource::unavailable()));
    vm.toggle_voice_capture().await;

    assert_eq!(vm.voice_state(), VoiceState::Idle);
    assert_eq!(texts(&vm), vec![GREETING, MICROPHONE_FAILURE_TEXT]);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn voice_round_trip_uploads_clip() {
    let backend = Arc::new(MockBackend::new());
    let audio = Arc::new(MockAudioSource::with_clip(b"abc"));
    let vm = voice_chat(backend.clone(), audio.clone());

    vm.toggle_voice_capture().await;
    assert_eq!(vm.voice_state(), VoiceState::Recording);
    assert!(!vm.is_busy());

    vm.toggle_voice_capture().await;
    assert_eq!(vm.voice_state(), VoiceState::Idle);
    assert_eq!(backend.calls(), vec!["send_audio:+911234567890"]);
    assert_eq!(last_text(&vm), "heard 3 bytes");
    assert_eq!(audio.start_count(), 1);
    assert!(!vm.is_busy());
}

#[tokio::test]
async fn concurrent_toggles_open_the_microphone_once() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend::new());
    let audio = Arc::new(MockAudioSource::with_clip(b"abc").gated(gate.clone()));
    let vm = Arc::new(voice_chat(backend.clone(), audio.clone()));

    let first = tokio::spawn({
        let vm = vm.clone();
        async move { vm.toggle_voice_capture().await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while audio.start_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    let second = tokio::spawn({
        let vm = vm.clone();
        async move { vm.toggle_voice_capture().await }
    });
    tokio::task::yield_now().await;
    assert_eq!(audio.start_count(), 1);
    assert_eq!(vm.voice_state(), VoiceState::Idle);

    gate.notify_one();
    first.await.unwrap();
    second.await.unwrap();

    // The second toggle waited for the first and stopped its recording.
    assert_eq!(audio.start_count(), 1);
    assert_eq!(vm.voice_state(), VoiceState::Idle);
    assert_eq!(backend.calls(), vec!["send_audio:+911234567890"]);

    gate.notify_one();
    vm.toggle_voice_capture().await;
    assert_eq!(audio.start_count(), 2);
    assert_eq!(vm.voice_state(), VoiceState::Recording);
}

#[tokio::test]
async fn empty_recording_is_not_uploaded() {
    let backend = Arc::new(MockBackend::new());
    let vm = voice_chat(backend.clone(), Arc::new(MockAudioSource::with_clip(b"")));
    vm.toggle_voice_capture().await;
    vm.toggle_voice_capture().await;

    assert_eq!(last_text(&vm), EMPTY_RECORDING_TEXT);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn voice_upload_failure_appends_failure_text() {
    let backend = Arc::new(MockBackend::failing(vec![TransportError::Server { status: 500, body: String::new() }]));
    let vm = voice_chat(backend, Arc::new(MockAudioSource::with_clip(b"abc")));
    vm.toggle_voice_capture().await;
    vm.toggle_voice_capture().await;
    assert_eq!(last_text(&vm), "Server error: 500. Please try again.");
    assert_eq!(vm.voice_state(), VoiceState::Idle);
}

// =========================================================================
// Quick actions
// =========================================================================

#[tokio::test]
async fn help_appends_one_local_message() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    let outcome = vm.run_quick_action(QuickAction::Help).await;

    assert_eq!(outcome, QuickOutcome::Done);
    assert_eq!(vm.snapshot().len(), 2);
    assert!(last_text(&vm).contains("📊 Monthly Summary"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn upload_bill_asks_for_a_file() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    assert_eq!(vm.run_quick_action(QuickAction::UploadBill).await, QuickOutcome::ChooseFile);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn menu_entries_submit_their_label() {
    let backend = Arc::new(MockBackend::new());
    let vm = chat(backend.clone());
    vm.run_quick_action(QuickAction::MonthlySummary).await;
    vm.run_quick_action(QuickAction::GstInputs).await;
    assert_eq!(backend.calls(), vec!["monthly_summary", "send_text:🧾 GST Inputs"]);
}

#[test]
fn command_normalization() {
    assert_eq!(normalize_command("📊 Monthly Summary"), "monthly summary");
    assert_eq!(normalize_command("  Monthly\tSUMMARY!! "), "monthly summary");
    assert!(!is_summary_command("monthly summary please"));
}
