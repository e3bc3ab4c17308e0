//! App store — authentication flow, screen selection and record screens.
//!
//! DESIGN
//! ======
//! The store owns the shared `Session` and `Backend` handles that every
//! screen uses, so there is no global state. The visible screen is derived:
//! while the session is unauthenticated only `Login` and `Register` can be
//! shown, which is how a 401 anywhere lands the user back on login.
//!
//! Every failing operation returns an `AppError` whose `Display` is the
//! notification text the surface shows; the transport cause stays attached
//! as the error source for logging.

#[cfg(test)]
#[path = "app_test.rs"]
mod app_test;

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{info, warn};

use crate::capture::AudioSource;
use crate::chat::ChatViewModel;
use crate::expense::ExpenseDraft;
use crate::session::{Credential, Session};
use crate::transport::{Account, Backend, Expense, Invoice, InvoiceDraft, NewAccount, Page, TransportError};

pub const INCORRECT_CREDENTIALS: &str = "Incorrect username or password.";
pub const LOGIN_FAILED: &str = "An error occurred. Please try again.";
pub const REGISTERED: &str = "Registration successful! Please login.";
pub const REGISTRATION_FAILED: &str = "Registration failed: Email may already be registered.";
pub const EXPENSE_CREATED: &str = "Expense created successfully";
pub const EXPENSE_UPDATED: &str = "Expense updated successfully";
pub const EXPENSE_DELETED: &str = "Expense deleted successfully";
pub const INVOICE_CREATED: &str = "Invoice created successfully";
pub const INVOICE_UPDATED: &str = "Invoice updated successfully";
pub const INVOICE_DELETED: &str = "Invoice deleted successfully";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Register,
    Chat,
    Records,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Local form validation failed; nothing was sent.
    #[error("{0}")]
    Invalid(&'static str),
    /// The backend call failed.
    #[error("{message}")]
    Rejected {
        message: &'static str,
        #[source]
        source: TransportError,
    },
}

impl AppError {
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { source, .. } if source.is_unauthorized())
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct App {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    requested: RwLock<Screen>,
}

impl App {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        let requested = if session.is_authenticated() { Screen::Chat } else { Screen::Login };
        Self { backend, session, requested: RwLock::new(requested) }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The screen to show. Unauthenticated sessions only see login or register.
    #[must_use]
    pub fn screen(&self) -> Screen {
        let requested = *self.requested.read().unwrap_or_else(PoisonError::into_inner);
        match (self.session.is_authenticated(), requested) {
            (false, Screen::Register) => Screen::Register,
            (false, _) => Screen::Login,
            (true, Screen::Records) => Screen::Records,
            (true, _) => Screen::Chat,
        }
    }

    pub fn navigate(&self, screen: Screen) {
        *self.requested.write().unwrap_or_else(PoisonError::into_inner) = screen;
    }

    /// A chat view-model sharing this store's backend and session.
    #[must_use]
    pub fn open_chat(&self, audio: Arc<dyn AudioSource>, from_number: &str) -> ChatViewModel {
        ChatViewModel::new(Arc::clone(&self.backend), Arc::clone(&self.session), audio, from_number)
    }

    // -------------------------------------------------------------------------
    // Authentication
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns the login form's error text on any failure.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AppError> {
        match self.backend.login(email.trim(), password).await {
            Ok(credential) => {
                self.session.login(credential);
                self.navigate(Screen::Chat);
                info!(email = email.trim(), "logged in");
                Ok(())
            }
            Err(source) => {
                warn!(error = %source, "login failed");
                let message = if source.is_unauthorized() { INCORRECT_CREDENTIALS } else { LOGIN_FAILED };
                Err(AppError::Rejected { message, source })
            }
        }
    }

    /// Validate the form, create the account and move to the login screen.
    ///
    /// # Errors
    ///
    /// Returns a validation message, or the registration failure text.
    pub async fn register(&self, email: &str, password: &str, confirm: &str) -> Result<Account, AppError> {
        let email = email.trim();
        validate_registration(email, password, confirm)?;

        let account = NewAccount { email: email.to_owned(), password: password.to_owned() };
        match self.backend.register(&account).await {
            Ok(account) => {
                info!(email = %account.email, "account registered");
                self.navigate(Screen::Login);
                Ok(account)
            }
            Err(source) => {
                warn!(error = %source, "registration failed");
                Err(AppError::Rejected { message: REGISTRATION_FAILED, source })
            }
        }
    }

    /// Returns whether a credential was held.
    pub fn logout(&self) -> bool {
        self.navigate(Screen::Login);
        self.session.logout()
    }

    /// # Errors
    ///
    /// Returns `Rejected` when the backend is unreachable.
    pub async fn health(&self) -> Result<Value, AppError> {
        self.backend
            .health()
            .await
            .map_err(|source| AppError::Rejected { message: "Backend is not reachable", source })
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns "Failed to fetch expenses" on any failure.
    pub async fn expenses(&self, page: Page) -> Result<Vec<Expense>, AppError> {
        let token = self.credential("Failed to fetch expenses")?;
        let result = self.backend.list_expenses(&token, page).await;
        self.settle(result, "Failed to fetch expenses")
    }

    /// # Errors
    ///
    /// Returns "Failed to fetch expense" on any failure.
    pub async fn expense(&self, id: i64) -> Result<Expense, AppError> {
        let token = self.credential("Failed to fetch expense")?;
        let result = self.backend.get_expense(&token, id).await;
        self.settle(result, "Failed to fetch expense")
    }

    /// Create an expense owned by user `owner`.
    ///
    /// # Errors
    ///
    /// Returns "Failed to create expense" on any failure.
    pub async fn create_expense(&self, owner: i64, draft: &ExpenseDraft) -> Result<Expense, AppError> {
        let token = self.credential("Failed to create expense")?;
        let result = self.backend.create_expense(&token, owner, draft).await;
        self.settle(result, "Failed to create expense")
    }

    /// # Errors
    ///
    /// Returns "Failed to update expense" on any failure.
    pub async fn update_expense(&self, id: i64, draft: &ExpenseDraft) -> Result<Expense, AppError> {
        let token = self.credential("Failed to update expense")?;
        let result = self.backend.update_expense(&token, id, draft).await;
        self.settle(result, "Failed to update expense")
    }

    /// # Errors
    ///
    /// Returns "Failed to delete expense" on any failure.
    pub async fn delete_expense(&self, id: i64) -> Result<Expense, AppError> {
        let token = self.credential("Failed to delete expense")?;
        let result = self.backend.delete_expense(&token, id).await;
        self.settle(result, "Failed to delete expense")
    }

    /// # Errors
    ///
    /// Returns "Failed to fetch invoices" on any failure.
    pub async fn invoices(&self, page: Page) -> Result<Vec<Invoice>, AppError> {
        let token = self.credential("Failed to fetch invoices")?;
        let result = self.backend.list_invoices(&token, page).await;
        self.settle(result, "Failed to fetch invoices")
    }

    /// # Errors
    ///
    /// Returns "Failed to fetch invoice" on any failure.
    pub async fn invoice(&self, id: i64) -> Result<Invoice, AppError> {
        let token = self.credential("Failed to fetch invoice")?;
        let result = self.backend.get_invoice(&token, id).await;
        self.settle(result, "Failed to fetch invoice")
    }

    /// # Errors
    ///
    /// Returns "Failed to create invoice" on any failure.
    pub async fn create_invoice(&self, owner: i64, draft: &InvoiceDraft) -> Result<Invoice, AppError> {
        let token = self.credential("Failed to create invoice")?;
        let result = self.backend.create_invoice(&token, owner, draft).await;
        self.settle(result, "Failed to create invoice")
    }

    /// # Errors
    ///
    /// Returns "Failed to update invoice" on any failure.
    pub async fn update_invoice(&self, id: i64, draft: &InvoiceDraft) -> Result<Invoice, AppError> {
        let token = self.credential("Failed to update invoice")?;
        let result = self.backend.update_invoice(&token, id, draft).await;
        self.settle(result, "Failed to update invoice")
    }

    /// # Errors
    ///
    /// Returns "Failed to delete invoice" on any failure.
    pub async fn delete_invoice(&self, id: i64) -> Result<Invoice, AppError> {
        let token = self.credential("Failed to delete invoice")?;
        let result = self.backend.delete_invoice(&token, id).await;
        self.settle(result, "Failed to delete invoice")
    }

    fn credential(&self, message: &'static str) -> Result<Credential, AppError> {
        self.session
            .current()
            .ok_or(AppError::Rejected { message, source: TransportError::Unauthorized })
    }

    /// Attach the notification text to a failure; a 401 also logs out.
    fn settle<T>(&self, result: Result<T, TransportError>, message: &'static str) -> Result<T, AppError> {
        result.map_err(|source| {
            warn!(error = %source, message, "record request failed");
            if source.is_unauthorized() {
                self.logout();
            }
            AppError::Rejected { message, source }
        })
    }
}

fn validate_registration(email: &str, password: &str, confirm: &str) -> Result<(), AppError> {
    if email.is_empty() {
        return Err(AppError::Invalid("Please input your E-mail!"));
    }
    if !is_email(email) {
        return Err(AppError::Invalid("The input is not valid E-mail!"));
    }
    if password.is_empty() {
        return Err(AppError::Invalid("Please input your password!"));
    }
    if confirm.is_empty() {
        return Err(AppError::Invalid("Please confirm your password!"));
    }
    if password != confirm {
        return Err(AppError::Invalid("The two passwords that you entered do not match!"));
    }
    Ok(())
}

fn is_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}
