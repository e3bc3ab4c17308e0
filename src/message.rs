//! Chat message model and the append-only message log.
//!
//! DESIGN
//! ======
//! The log is the single source of truth for what the chat renders. Entries
//! are appended in display order and carry a log-assigned id. The only other
//! mutation is removing a resolved confirmation entry; nothing is edited in
//! place and nothing is reordered.

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields extracted from a bill image, in the order the backend returned them.
pub type ExtractedFields = Map<String, Value>;

/// Log-assigned message id. Monotonic, never reused within one log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Assistant,
}

/// A local image shown in the chat as a preview of an upload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub file_name: String,
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Monthly spending report returned by `GET /summary/monthly`.
///
/// Figures are kept as raw JSON values since the backend sends either
/// preformatted strings (`"₹12,540.00"`) or bare numbers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonthlySummary {
    pub title: String,
    pub total_spend: Value,
    pub top_vendors: Vec<String>,
    pub gst_input: Value,
    pub category_breakdown: Map<String, Value>,
}

/// Kind-specific message payload.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageKind {
    Text(String),
    Image(ImageRef),
    Summary(MonthlySummary),
    Confirmation(ExtractedFields),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub origin: Origin,
    pub kind: MessageKind,
}

impl Message {
    #[must_use]
    pub fn is_confirmation(&self) -> bool {
        matches!(self.kind, MessageKind::Confirmation(_))
    }

    /// Text payload, if this is a text message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Append-only ordered message log.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
    next_id: u64,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its id.
    pub fn append(&mut self, origin: Origin, kind: MessageKind) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.entries.push(Message { id, origin, kind });
        id
    }

    pub fn append_text(&mut self, origin: Origin, text: impl Into<String>) -> MessageId {
        self.append(origin, MessageKind::Text(text.into()))
    }

    /// Remove a confirmation entry. Returns `None` when the id is absent or
    /// the entry is not a confirmation; other kinds are never removed.
    pub fn remove_confirmation(&mut self, id: MessageId) -> Option<ExtractedFields> {
        let index = self.entries.iter().position(|m| m.id == id && m.is_confirmation())?;
        match self.entries.remove(index).kind {
            MessageKind::Confirmation(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    /// Messages appended after `id`, in log order.
    pub fn since(&self, id: Option<MessageId>) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter(move |m| id.is_none_or(|after| m.id > after))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.clone()
    }
}

/// Render a loose JSON scalar the way a person would read it.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}
