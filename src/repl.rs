//! Interactive terminal chat.
//!
//! DESIGN
//! ======
//! The input loop never waits on the network: each submission is spawned into
//! a `JoinSet` and the loop goes back to reading stdin. A separate renderer
//! task watches the chat view-model and prints every newly appended message
//! in log order, plus the typing indicator when an exchange starts. On quit
//! the loop drains outstanding submissions, then flushes the renderer once.

#[cfg(test)]
#[path = "repl_test.rs"]
mod repl_test;

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

use crate::app::{App, Screen};
use crate::chat::{ChatViewModel, ConfirmAction, QuickAction, QuickOutcome};
use crate::message::{ImageRef, MessageId, Origin};
use crate::render::{RenderedMessage, render, render_typing};

const PROMPT_HELP: &str = "\
Type a message and press enter. Commands:
  /image <path>   upload a bill image
  /voice          start or stop a voice note
  /confirm <id>   confirm extracted bill data
  /retry <id>     discard extracted bill data
  /menu [n]       show the quick actions, or run entry n
  /summary        monthly summary
  /logout         log out and leave
  /help           this text
  /quit           leave";

#[derive(Debug, thiserror::Error)]
pub enum ReplError {
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Text(String),
    Image(PathBuf),
    Voice,
    Resolve(MessageId, ConfirmAction),
    Menu(Option<usize>),
    Summary,
    Logout,
    Help,
    Quit,
    Invalid(String),
    Empty,
}

#[must_use]
pub fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Text(line.to_owned());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match (name, arg) {
        ("image", "") => ReplCommand::Invalid("usage: /image <path>".into()),
        ("image", path) => ReplCommand::Image(PathBuf::from(path)),
        ("voice", _) => ReplCommand::Voice,
        ("confirm" | "retry", id) => match id.parse::<u64>() {
            Ok(id) => ReplCommand::Resolve(MessageId(id), ConfirmAction::from_label(name)),
            Err(_) => ReplCommand::Invalid(format!("usage: /{name} <id>")),
        },
        ("menu", "") => ReplCommand::Menu(None),
        ("menu", n) => match n.parse::<usize>() {
            Ok(n) if (1..=QuickAction::ALL.len()).contains(&n) => ReplCommand::Menu(Some(n)),
            _ => ReplCommand::Invalid(format!("usage: /menu [1-{}]", QuickAction::ALL.len())),
        },
        ("summary", _) => ReplCommand::Summary,
        ("logout", _) => ReplCommand::Logout,
        ("help", _) => ReplCommand::Help,
        ("quit" | "exit", _) => ReplCommand::Quit,
        _ => ReplCommand::Invalid(format!("unknown command /{name}; try /help")),
    }
}

/// Terminal form of a rendered message: `[id] who> first line`, with
/// continuation lines indented under it.
#[must_use]
pub fn format_rendered(rendered: &RenderedMessage) -> String {
    let speaker = match rendered.origin {
        Origin::User => "you",
        Origin::Assistant => "bot",
    };
    let mut out = format!("[{}] {speaker}>", rendered.id);
    let mut lines = rendered.lines.iter();
    if let Some(first) = lines.next() {
        let _ = write!(out, " {first}");
    }
    for line in lines {
        let _ = write!(out, "\n      {line}");
    }
    if !rendered.actions.is_empty() {
        let buttons: Vec<String> = rendered.actions.iter().map(|a| format!("/{} {}", a.label, a.target)).collect();
        let _ = write!(out, "\n      ({})", buttons.join(" | "));
    }
    out
}

#[must_use]
pub fn menu_text() -> String {
    QuickAction::ALL
        .iter()
        .enumerate()
        .map(|(i, action)| format!("  {}. {}", i + 1, action.label()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// MIME type for a bill image, by extension.
#[must_use]
pub fn image_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

async fn load_image(path: &Path) -> std::io::Result<ImageRef> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map_or_else(|| "bill".to_owned(), |n| n.to_string_lossy().into_owned());
    Ok(ImageRef { file_name, mime: image_type(path).to_owned(), bytes: Arc::from(bytes) })
}

// =============================================================================
// LOOP
// =============================================================================

/// Run the chat until `/quit`, `/logout`, end of input, or session loss.
///
/// # Errors
///
/// Returns an error when stdin cannot be read.
pub async fn run(app: Arc<App>, chat: Arc<ChatViewModel>) -> Result<(), ReplError> {
    println!("Vyapar Bot. /help lists commands.");
    let (stop_tx, stop_rx) = oneshot::channel();
    let renderer = tokio::spawn(render_loop(Arc::clone(&chat), chat.subscribe(), stop_rx));

    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Text(text) => {
                let chat = Arc::clone(&chat);
                tasks.spawn(async move { chat.submit_text(&text).await });
            }
            ReplCommand::Image(path) => match load_image(&path).await {
                Ok(image) => {
                    let chat = Arc::clone(&chat);
                    tasks.spawn(async move { chat.submit_image(image).await });
                }
                Err(e) => eprintln!("cannot read {}: {e}", path.display()),
            },
            ReplCommand::Voice => {
                let chat = Arc::clone(&chat);
                tasks.spawn(async move { chat.toggle_voice_capture().await });
            }
            ReplCommand::Resolve(id, action) => {
                let chat = Arc::clone(&chat);
                tasks.spawn(async move { chat.resolve_confirmation(id, action).await });
            }
            ReplCommand::Menu(None) => println!("{}", menu_text()),
            ReplCommand::Menu(Some(n)) => {
                let action = QuickAction::ALL[n - 1];
                let chat = Arc::clone(&chat);
                tasks.spawn(async move {
                    if chat.run_quick_action(action).await == QuickOutcome::ChooseFile {
                        println!("Use /image <path> to choose the bill.");
                    }
                });
            }
            ReplCommand::Summary => {
                let chat = Arc::clone(&chat);
                tasks.spawn(async move { chat.submit_text(QuickAction::MonthlySummary.label()).await });
            }
            ReplCommand::Logout => {
                app.logout();
                println!("Logged out.");
                break;
            }
            ReplCommand::Help => println!("{PROMPT_HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Invalid(message) => eprintln!("{message}"),
        }

        // Reap finished submissions so the set does not grow unbounded.
        while tasks.try_join_next().is_some() {}

        if app.screen() == Screen::Login {
            eprintln!("Session ended. Run `vyapar login` to sign in again.");
            break;
        }
    }

    while tasks.join_next().await.is_some() {}
    let _ = stop_tx.send(());
    if let Err(e) = renderer.await {
        tracing::warn!(error = %e, "renderer task failed");
    }
    Ok(())
}

async fn render_loop(chat: Arc<ChatViewModel>, mut changes: watch::Receiver<u64>, mut stop: oneshot::Receiver<()>) {
    let mut last: Option<MessageId> = None;
    let mut was_busy = false;
    loop {
        for message in chat.messages_since(last) {
            println!("{}", format_rendered(&render(&message)));
            last = Some(message.id);
        }
        let busy = chat.is_busy();
        if busy && !was_busy {
            println!("      {}", render_typing());
        }
        was_busy = busy;

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = &mut stop => {
                for message in chat.messages_since(last) {
                    println!("{}", format_rendered(&render(&message)));
                }
                return;
            }
        }
    }
}
