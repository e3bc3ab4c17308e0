//! Message renderer: a pure mapping from a log entry to display lines.
//!
//! Confirmation cards expose their two actions bound to the message id;
//! deciding what an action does belongs to the chat view-model.

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

use crate::chat::ConfirmAction;
use crate::message::{ImageRef, Message, MessageId, MessageKind, MonthlySummary, Origin, display_value};

pub const TYPING_INDICATOR: &str = "Typing...";
const CONFIRMATION_HEADER: &str = "Extracted Data";

/// A button on a rendered card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAction {
    pub label: &'static str,
    pub action: ConfirmAction,
    pub target: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub origin: Origin,
    pub lines: Vec<String>,
    pub actions: Vec<CardAction>,
}

#[must_use]
pub fn render(message: &Message) -> RenderedMessage {
    let mut actions = Vec::new();
    let lines = match &message.kind {
        MessageKind::Text(text) => text.lines().map(str::to_owned).collect(),
        MessageKind::Image(image) => vec![image_line(image)],
        MessageKind::Summary(summary) => summary_lines(summary),
        MessageKind::Confirmation(fields) => {
            actions = [ConfirmAction::Confirm, ConfirmAction::Retry]
                .into_iter()
                .map(|action| CardAction { label: action.label(), action, target: message.id })
                .collect();
            std::iter::once(CONFIRMATION_HEADER.to_owned())
                .chain(fields.iter().map(|(key, value)| format!("{key}: {}", display_value(value))))
                .collect()
        }
    };
    RenderedMessage { id: message.id, origin: message.origin, lines, actions }
}

/// The transient indicator shown while an exchange is outstanding.
#[must_use]
pub fn render_typing() -> String {
    TYPING_INDICATOR.to_owned()
}

fn image_line(image: &ImageRef) -> String {
    format!("[image] {} ({})", image.file_name, human_size(image.bytes.len()))
}

fn summary_lines(summary: &MonthlySummary) -> Vec<String> {
    let mut lines = vec![
        summary.title.clone(),
        format!("Total Spend: {}", display_value(&summary.total_spend)),
        format!("GST Input: {}", display_value(&summary.gst_input)),
        format!("Top Vendors: {}", summary.top_vendors.join(", ")),
        "Breakdown:".to_owned(),
    ];
    lines.extend(
        summary
            .category_breakdown
            .iter()
            .map(|(category, amount)| format!("  - {category}: {}", display_value(amount))),
    );
    lines
}

#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KIB {
        format!("{bytes} B")
    } else if size < KIB * KIB {
        format!("{:.1} KB", size / KIB)
    } else {
        format!("{:.1} MB", size / (KIB * KIB))
    }
}
