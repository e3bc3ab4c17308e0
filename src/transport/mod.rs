//! Transport — one async operation per VyaparAI backend endpoint.
//!
//! DESIGN
//! ======
//! `Backend` is the seam between the view-models and the network: the chat
//! and app stores only see this trait, tests substitute a mock, and
//! `HttpBackend` is the reqwest implementation. Authenticated operations take
//! the credential explicitly; the transport never touches the session or the
//! message log. A 401 comes back as `TransportError::Unauthorized` and the
//! caller decides to log out.

pub mod error;
pub mod http;
pub mod types;

pub use error::{FailureContext, TransportError};
pub use http::HttpBackend;
pub use types::{Account, AudioReply, Expense, Invoice, InvoiceDraft, NewAccount, Page, TextReply};

use serde_json::Value;

use crate::capture::AudioClip;
use crate::expense::ExpenseDraft;
use crate::message::{ExtractedFields, ImageRef, MonthlySummary};
use crate::session::Credential;

#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// `POST /token` with a form-encoded username/password.
    async fn login(&self, email: &str, password: &str) -> Result<Credential, TransportError>;

    /// `POST /users/`.
    async fn register(&self, account: &NewAccount) -> Result<Account, TransportError>;

    /// `GET /health`.
    async fn health(&self) -> Result<Value, TransportError>;

    /// `POST /webhook/text`.
    async fn send_text(&self, token: &Credential, text: &str) -> Result<TextReply, TransportError>;

    /// `POST /webhook/image` (multipart `image`). Returns the extracted fields.
    async fn send_image(&self, token: &Credential, image: &ImageRef) -> Result<ExtractedFields, TransportError>;

    /// `POST /webhook/audio` (multipart `from_number`, `audio`).
    async fn send_audio(
        &self,
        token: &Credential,
        from_number: &str,
        clip: &AudioClip,
    ) -> Result<AudioReply, TransportError>;

    /// `GET /summary/monthly`.
    async fn monthly_summary(&self, token: &Credential) -> Result<MonthlySummary, TransportError>;

    /// `POST /expenses/confirm_ocr`.
    async fn confirm_expense(&self, token: &Credential, draft: &ExpenseDraft) -> Result<Value, TransportError>;

    /// `POST /users/{owner}/expenses/`.
    async fn create_expense(
        &self,
        token: &Credential,
        owner: i64,
        draft: &ExpenseDraft,
    ) -> Result<Expense, TransportError>;
    async fn list_expenses(&self, token: &Credential, page: Page) -> Result<Vec<Expense>, TransportError>;
    async fn get_expense(&self, token: &Credential, id: i64) -> Result<Expense, TransportError>;
    async fn update_expense(
        &self,
        token: &Credential,
        id: i64,
        draft: &ExpenseDraft,
    ) -> Result<Expense, TransportError>;
    async fn delete_expense(&self, token: &Credential, id: i64) -> Result<Expense, TransportError>;

    /// `POST /users/{owner}/invoices/`.
    async fn create_invoice(
        &self,
        token: &Credential,
        owner: i64,
        draft: &InvoiceDraft,
    ) -> Result<Invoice, TransportError>;
    async fn list_invoices(&self, token: &Credential, page: Page) -> Result<Vec<Invoice>, TransportError>;
    async fn get_invoice(&self, token: &Credential, id: i64) -> Result<Invoice, TransportError>;
    async fn update_invoice(
        &self,
        token: &Credential,
        id: i64,
        draft: &InvoiceDraft,
    ) -> Result<Invoice, TransportError>;
    async fn delete_invoice(&self, token: &Credential, id: i64) -> Result<Invoice, TransportError>;
}
