//! Wire types for the VyaparAI backend endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Clone, Serialize)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount").field("email", &self.email).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: Option<i64>,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextRequest<'a> {
    pub text: &'a str,
}

/// Reply to a text message. Questions are answered with `{text}`; a message
/// that records an expense or creates an invoice comes back as `{status, summary}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl TextReply {
    /// The text to show, or `None` when the backend sent nothing readable.
    #[must_use]
    pub fn into_message(self) -> Option<String> {
        first_non_blank([self.text, self.summary, self.status.unwrap_or_default()])
    }
}

/// Reply to a voice upload. Older backends answer `{text}` or only `{status}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioReply {
    #[serde(default, alias = "text")]
    pub summary: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl AudioReply {
    #[must_use]
    pub fn into_message(self) -> Option<String> {
        first_non_blank([self.summary, self.status.unwrap_or_default()])
    }
}

fn first_non_blank<const N: usize>(candidates: [String; N]) -> Option<String> {
    candidates.into_iter().find(|c| !c.trim().is_empty())
}

/// Expense record as listed by `GET /expenses/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

/// Invoice record as listed by `GET /invoices/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

/// Body of `POST /users/{owner}/invoices/` and `PUT /invoices/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceDraft {
    pub date: String,
    pub customer_name: String,
    pub amount: f64,
}

/// `skip`/`limit` paging accepted by the list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub skip: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}
