//! Chat view-model — user intents → backend exchanges → message log.
//!
//! DESIGN
//! ======
//! Every operation takes `&self`, so the terminal can spawn several and let
//! them complete in any order. Shared state lives behind a std mutex that is
//! only held for short, synchronous critical sections; no lock on the log is
//! ever held across an `.await`. Each mutation bumps a watch channel so the
//! renderer can redraw.
//!
//! Failures never escape: every operation converts its own errors into
//! exactly one appended assistant message. An unauthorized reply also logs
//! the shared session out.
//!
//! The voice recorder has its own async mutex. Holding it across `start` and
//! `stop` serializes toggles, so a second capture can never begin while one is
//! live. The upload that follows a stop runs after the recorder is released.

#[cfg(test)]
#[path = "chat_test.rs"]
mod chat_test;

use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};

use time::Date;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capture::{AudioSource, CaptureError, Recording};
use crate::expense::ExpenseDraft;
use crate::message::{ImageRef, Message, MessageId, MessageKind, MessageLog, Origin};
use crate::session::{Credential, Session};
use crate::transport::{Backend, FailureContext, TransportError};

pub const GREETING: &str = "Hello! How can I help you today?";
pub const CONFIRMED_TEXT: &str = "✅ Expense confirmed and recorded.";
pub const CANCELLED_TEXT: &str = "❌ Action cancelled.";
pub const MICROPHONE_FAILURE_TEXT: &str = "Could not access the microphone. Please check permissions.";
pub const EMPTY_RECORDING_TEXT: &str = "No audio was recorded. Please try again.";
pub const CHOOSE_BILL_TEXT: &str = "Choose a bill image to upload.";

const SUMMARY_COMMAND: &str = "monthly summary";

// =============================================================================
// TYPES
// =============================================================================

/// Resolution chosen on a confirmation card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    Confirm,
    Retry,
}

impl ConfirmAction {
    /// `confirm` (any case) confirms; every other label rejects.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("confirm") { Self::Confirm } else { Self::Retry }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Recording,
}

/// Entries of the attachment menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickAction {
    UploadBill,
    VoiceExpense,
    MonthlySummary,
    GstInputs,
    Help,
}

impl QuickAction {
    pub const ALL: [Self; 5] = [Self::UploadBill, Self::VoiceExpense, Self::MonthlySummary, Self::GstInputs, Self::Help];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::UploadBill => "📸 Upload Bill",
            Self::VoiceExpense => "🎤 Voice Expense",
            Self::MonthlySummary => "📊 Monthly Summary",
            Self::GstInputs => "🧾 GST Inputs",
            Self::Help => "❓ Help",
        }
    }
}

/// What the surface must do after a quick action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickOutcome {
    Done,
    /// The surface should ask for a file and call `submit_image`.
    ChooseFile,
}

struct ChatState {
    log: MessageLog,
    in_flight: usize,
    /// Uploads in flight, keyed by their preview message, oldest first.
    uploads: Vec<(MessageId, String)>,
    voice: VoiceState,
}

// =============================================================================
// VIEW-MODEL
// =============================================================================

pub struct ChatViewModel {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    audio: Arc<dyn AudioSource>,
    from_number: String,
    today: fn() -> Date,
    state: Mutex<ChatState>,
    recorder: tokio::sync::Mutex<Option<Box<dyn Recording>>>,
    changes: watch::Sender<u64>,
}

impl ChatViewModel {
    /// Start a fresh chat whose log holds only the greeting.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<Session>,
        audio: Arc<dyn AudioSource>,
        from_number: impl Into<String>,
    ) -> Self {
        let mut log = MessageLog::new();
        log.append_text(Origin::Assistant, GREETING);
        let (changes, _) = watch::channel(0);
        Self {
            backend,
            session,
            audio,
            from_number: from_number.into(),
            today: crate::expense::today,
            state: Mutex::new(ChatState { log, in_flight: 0, uploads: Vec::new(), voice: VoiceState::Idle }),
            recorder: tokio::sync::Mutex::new(None),
            changes,
        }
    }

    /// Override the clock used to date expenses without a bill date.
    #[must_use]
    pub fn with_today(mut self, today: fn() -> Date) -> Self {
        self.today = today;
        self
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.read(|s| s.log.snapshot())
    }

    /// Messages appended after `id`.
    #[must_use]
    pub fn messages_since(&self, id: Option<MessageId>) -> Vec<Message> {
        self.read(|s| s.log.since(id).cloned().collect())
    }

    /// True while at least one exchange is outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.read(|s| s.in_flight > 0)
    }

    #[must_use]
    pub fn voice_state(&self) -> VoiceState {
        self.read(|s| s.voice)
    }

    /// File name of the most recent image still being uploaded.
    #[must_use]
    pub fn pending_upload(&self) -> Option<String> {
        self.read(|s| s.uploads.last().map(|(_, name)| name.clone()))
    }

    /// Receiver that changes on every state mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Send a text message. Blank input is ignored.
    pub async fn submit_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.append(Origin::User, MessageKind::Text(text.to_owned()));
        let _busy = BusyGuard::enter(self, None);

        if is_summary_command(text) {
            debug!("monthly summary requested");
            let result = match self.credential() {
                Ok(token) => self.backend.monthly_summary(&token).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(summary) => {
                    self.append(Origin::Assistant, MessageKind::Summary(summary));
                }
                Err(e) => self.fail(&e, FailureContext::General),
            }
            return;
        }

        let result = match self.credential() {
            Ok(token) => self.backend.send_text(&token, text).await,
            Err(e) => Err(e),
        };
        match result.and_then(|reply| reply.into_message().ok_or_else(empty_reply)) {
            Ok(text) => {
                self.append_text(text);
            }
            Err(e) => self.fail(&e, FailureContext::General),
        }
    }

    /// Show the image locally, upload it, and append the extracted data card.
    pub async fn submit_image(&self, image: ImageRef) {
        let preview = self.append(Origin::User, MessageKind::Image(image.clone()));
        let _busy = BusyGuard::enter(self, Some((preview, image.file_name.clone())));
        info!(file = %image.file_name, bytes = image.bytes.len(), "uploading bill image");

        let result = match self.credential() {
            Ok(token) => self.backend.send_image(&token, &image).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(fields) => {
                self.append(Origin::Assistant, MessageKind::Confirmation(fields));
            }
            Err(e) => self.fail(&e, FailureContext::Image),
        }
    }

    /// Resolve a confirmation card. Unknown or already-resolved ids are ignored.
    pub async fn resolve_confirmation(&self, id: MessageId, action: ConfirmAction) {
        let Some(fields) = self.write(|s| s.log.remove_confirmation(id)) else {
            debug!(%id, "confirmation already resolved");
            return;
        };

        if action == ConfirmAction::Retry {
            self.append_text(CANCELLED_TEXT);
            return;
        }

        let draft = match ExpenseDraft::from_extracted(&fields, (self.today)()) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(error = %e, "extracted fields rejected");
                self.append_text(format!("Could not record the expense: {e}."));
                return;
            }
        };

        let _busy = BusyGuard::enter(self, None);
        let result = match self.credential() {
            Ok(token) => self.backend.confirm_expense(&token, &draft).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {
                info!(item = %draft.item, amount = draft.amount, "expense confirmed");
                self.append_text(CONFIRMED_TEXT);
            }
            Err(e) => self.fail(&e, FailureContext::General),
        }
    }

    /// Start recording when idle; stop and upload when recording.
    pub async fn toggle_voice_capture(&self) {
        let mut slot = self.recorder.lock().await;

        let Some(mut recording) = slot.take() else {
            match self.audio.start().await {
                Ok(recording) => {
                    *slot = Some(recording);
                    self.write(|s| s.voice = VoiceState::Recording);
                    info!("voice capture started");
                }
                Err(e) => {
                    warn!(error = %e, "voice capture unavailable");
                    self.append_text(MICROPHONE_FAILURE_TEXT);
                }
            }
            return;
        };

        let clip = recording.stop().await;
        drop(recording);
        self.write(|s| s.voice = VoiceState::Idle);
        drop(slot);

        let clip = match clip {
            Ok(clip) => clip,
            Err(CaptureError::Empty) => {
                self.append_text(EMPTY_RECORDING_TEXT);
                return;
            }
            Err(e) => {
                warn!(error = %e, "voice capture failed");
                self.append_text(MICROPHONE_FAILURE_TEXT);
                return;
            }
        };

        let _busy = BusyGuard::enter(self, None);
        info!(file = %clip.file_name, bytes = clip.bytes.len(), "uploading voice clip");
        let result = match self.credential() {
            Ok(token) => self.backend.send_audio(&token, &self.from_number, &clip).await,
            Err(e) => Err(e),
        };
        match result.and_then(|reply| reply.into_message().ok_or_else(empty_reply)) {
            Ok(text) => {
                self.append_text(text);
            }
            Err(e) => self.fail(&e, FailureContext::General),
        }
    }

    /// Run an attachment-menu entry.
    pub async fn run_quick_action(&self, action: QuickAction) -> QuickOutcome {
        match action {
            QuickAction::UploadBill => {
                self.append_text(CHOOSE_BILL_TEXT);
                return QuickOutcome::ChooseFile;
            }
            QuickAction::VoiceExpense => self.toggle_voice_capture().await,
            QuickAction::MonthlySummary | QuickAction::GstInputs => self.submit_text(action.label()).await,
            QuickAction::Help => {
                self.append_text(help_text());
            }
        }
        QuickOutcome::Done
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let result = f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
        result
    }

    fn append(&self, origin: Origin, kind: MessageKind) -> MessageId {
        self.write(|s| s.log.append(origin, kind))
    }

    fn append_text(&self, text: impl Into<String>) -> MessageId {
        self.append(Origin::Assistant, MessageKind::Text(text.into()))
    }

    fn credential(&self) -> Result<Credential, TransportError> {
        self.session.current().ok_or(TransportError::Unauthorized)
    }

    fn fail(&self, error: &TransportError, context: FailureContext) {
        warn!(error = %error, ?context, "chat exchange failed");
        if error.is_unauthorized() && self.session.logout() {
            info!("logged out after unauthorized reply");
        }
        self.append_text(error.user_message(context));
    }
}

/// Holds the busy indicator (and optionally one pending upload) for one exchange.
struct BusyGuard<'a> {
    vm: &'a ChatViewModel,
    upload: Option<MessageId>,
}

impl<'a> BusyGuard<'a> {
    fn enter(vm: &'a ChatViewModel, upload: Option<(MessageId, String)>) -> Self {
        let key = upload.as_ref().map(|(id, _)| *id);
        vm.write(|s| {
            s.in_flight += 1;
            s.uploads.extend(upload);
        });
        Self { vm, upload: key }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let upload = self.upload;
        self.vm.write(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            if let Some(id) = upload {
                s.uploads.retain(|(preview, _)| *preview != id);
            }
        });
    }
}

fn empty_reply() -> TransportError {
    TransportError::Decode("reply carried no text".into())
}

/// Lowercase, keep letters and digits, collapse whitespace.
fn normalize_command(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_summary_command(text: &str) -> bool {
    normalize_command(text) == SUMMARY_COMMAND
}

fn help_text() -> String {
    let mut text = String::from("Here is what I can do:");
    for action in QuickAction::ALL {
        let detail = match action {
            QuickAction::UploadBill => "send a photo of a bill and I will extract the expense",
            QuickAction::VoiceExpense => "record a voice note describing an expense",
            QuickAction::MonthlySummary => "see this month's spending",
            QuickAction::GstInputs => "ask about your GST input credit",
            QuickAction::Help => "show this list",
        };
        let _ = write!(text, "\n{}: {detail}", action.label());
    }
    text
}
