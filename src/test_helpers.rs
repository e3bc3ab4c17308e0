//! Mock backend and audio source shared by the view-model tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::capture::{AudioSource, CaptureError, ChunkRecording, Recording};
use crate::expense::ExpenseDraft;
use crate::message::{ExtractedFields, ImageRef, MonthlySummary};
use crate::session::{Credential, MemoryCredentialStore, Session};
use crate::transport::{
    Account, AudioReply, Backend, Expense, Invoice, InvoiceDraft, NewAccount, Page, TextReply, TransportError,
};

pub const TEST_EMAIL: &str = "owner@shop.test";
pub const TEST_PASSWORD: &str = "secret";
pub const TEST_TOKEN: &str = "tok-test";

pub fn logged_in_session() -> Arc<Session> {
    let store = MemoryCredentialStore::with_credential(Credential::new(TEST_TOKEN));
    Arc::new(Session::restore(Arc::new(store)))
}

pub fn logged_out_session() -> Arc<Session> {
    Arc::new(Session::restore(Arc::new(MemoryCredentialStore::default())))
}

pub fn bill_fields() -> ExtractedFields {
    json!({ "Vendor": "Acme Traders", "Total Amount": "₹1,250.00", "Date": "01/03/2024" })
        .as_object()
        .cloned()
        .unwrap()
}

pub fn expense(id: i64, item: &str, amount: f64) -> Expense {
    Expense { id, date: Some("2024-03-01".into()), item: item.into(), amount, owner_id: Some(1) }
}

pub fn invoice(id: i64, customer_name: &str, amount: f64) -> Invoice {
    Invoice { id, date: Some("2024-03-01".into()), customer_name: customer_name.into(), amount, owner_id: Some(1) }
}

// =========================================================================
// MockBackend
// =========================================================================

/// Records every call by name; fails calls from a queue of scripted errors.
pub struct MockBackend {
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<TransportError>>,
    gate: Option<Arc<Notify>>,
    keyed_gates: HashMap<String, Arc<Notify>>,
    text_reply: Option<TextReply>,
    extracted: ExtractedFields,
    pub confirmed: Mutex<Vec<ExpenseDraft>>,
    pub expenses: Mutex<Vec<Expense>>,
    pub invoices: Mutex<Vec<Invoice>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
            keyed_gates: HashMap::new(),
            text_reply: None,
            extracted: bill_fields(),
            confirmed: Mutex::new(Vec::new()),
            expenses: Mutex::new(Vec::new()),
            invoices: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next calls, in order, with `errors`.
    pub fn failing(errors: Vec<TransportError>) -> Self {
        let mock = Self::new();
        *mock.failures.lock().unwrap() = errors.into();
        mock
    }

    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// `send_text` and `send_image` wait for one `notify_one` on `gate` before replying.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Gate only the `send_text` for `key` or the `send_image` of file `key`.
    pub fn gated_on(mut self, key: &str, gate: Arc<Notify>) -> Self {
        self.keyed_gates.insert(key.to_owned(), gate);
        self
    }

    /// Answer every `send_text` with `reply` instead of an echo.
    pub fn with_text_reply(mut self, reply: TextReply) -> Self {
        self.text_reply = Some(reply);
        self
    }

    pub fn with_extracted(mut self, fields: ExtractedFields) -> Self {
        self.extracted = fields;
        self
    }

    pub fn with_records(self, expenses: Vec<Expense>, invoices: Vec<Invoice>) -> Self {
        *self.expenses.lock().unwrap() = expenses;
        *self.invoices.lock().unwrap() = invoices;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn wait_gate(&self, key: &str) {
        if let Some(gate) = self.keyed_gates.get(key).or(self.gate.as_ref()) {
            gate.notified().await;
        }
    }

    fn next_id(&self) -> i64 {
        let expenses = self.expenses.lock().unwrap().iter().map(|e| e.id).max().unwrap_or(0);
        let invoices = self.invoices.lock().unwrap().iter().map(|i| i.id).max().unwrap_or(0);
        expenses.max(invoices) + 1
    }

    fn enter(&self, call: impl Into<String>) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call.into());
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn not_found() -> TransportError {
    TransportError::Server { status: 404, body: "not found".into() }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    async fn login(&self, email: &str, password: &str) -> Result<Credential, TransportError> {
        self.enter("login")?;
        if email == TEST_EMAIL && password == TEST_PASSWORD {
            Ok(Credential::new(TEST_TOKEN))
        } else {
            Err(TransportError::Unauthorized)
        }
    }

    async fn register(&self, account: &NewAccount) -> Result<Account, TransportError> {
        self.enter("register")?;
        Ok(Account { id: Some(1), email: account.email.clone() })
    }

    async fn health(&self) -> Result<Value, TransportError> {
        self.enter("health")?;
        Ok(json!({ "status": "ok" }))
    }

    async fn send_text(&self, _token: &Credential, text: &str) -> Result<TextReply, TransportError> {
        self.enter(format!("send_text:{text}"))?;
        self.wait_gate(text).await;
        match &self.text_reply {
            Some(reply) => Ok(reply.clone()),
            None => Ok(TextReply { text: format!("echo: {text}"), ..TextReply::default() }),
        }
    }

    async fn send_image(&self, _token: &Credential, image: &ImageRef) -> Result<ExtractedFields, TransportError> {
        self.enter(format!("send_image:{}", image.file_name))?;
        self.wait_gate(&image.file_name).await;
        Ok(self.extracted.clone())
    }

    async fn send_audio(
        &self,
        _token: &Credential,
        from_number: &str,
        clip: &crate::capture::AudioClip,
    ) -> Result<AudioReply, TransportError> {
        self.enter(format!("send_audio:{from_number}"))?;
        Ok(AudioReply { summary: format!("heard {} bytes", clip.bytes.len()), status: None })
    }

    async fn monthly_summary(&self, _token: &Credential) -> Result<MonthlySummary, TransportError> {
        self.enter("monthly_summary")?;
        Ok(MonthlySummary {
            title: "Monthly Summary for November 2025".into(),
            total_spend: json!("₹12,540.00"),
            top_vendors: vec!["Zomato".into(), "Indian Oil".into()],
            gst_input: json!("₹1,881.00"),
            category_breakdown: json!({ "Food": "₹4,500.00" }).as_object().cloned().unwrap(),
        })
    }

    async fn confirm_expense(&self, _token: &Credential, draft: &ExpenseDraft) -> Result<Value, TransportError> {
        self.enter("confirm_expense")?;
        self.confirmed.lock().unwrap().push(draft.clone());
        Ok(json!({ "status": "recorded" }))
    }

    async fn create_expense(
        &self,
        _token: &Credential,
        owner: i64,
        draft: &ExpenseDraft,
    ) -> Result<Expense, TransportError> {
        self.enter(format!("create_expense:{owner}"))?;
        let created = Expense {
            id: self.next_id(),
            date: Some(draft.date.clone()),
            item: draft.item.clone(),
            amount: draft.amount,
            owner_id: Some(owner),
        };
        self.expenses.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn list_expenses(&self, _token: &Credential, _page: Page) -> Result<Vec<Expense>, TransportError> {
        self.enter("list_expenses")?;
        Ok(self.expenses.lock().unwrap().clone())
    }

    async fn get_expense(&self, _token: &Credential, id: i64) -> Result<Expense, TransportError> {
        self.enter(format!("get_expense:{id}"))?;
        self.expenses.lock().unwrap().iter().find(|e| e.id == id).cloned().ok_or_else(not_found)
    }

    async fn update_expense(
        &self,
        _token: &Credential,
        id: i64,
        draft: &ExpenseDraft,
    ) -> Result<Expense, TransportError> {
        self.enter(format!("update_expense:{id}"))?;
        let mut expenses = self.expenses.lock().unwrap();
        let expense = expenses.iter_mut().find(|e| e.id == id).ok_or_else(not_found)?;
        expense.item.clone_from(&draft.item);
        expense.amount = draft.amount;
        expense.date = Some(draft.date.clone());
        Ok(expense.clone())
    }

    async fn delete_expense(&self, _token: &Credential, id: i64) -> Result<Expense, TransportError> {
        self.enter(format!("delete_expense:{id}"))?;
        let mut expenses = self.expenses.lock().unwrap();
        let index = expenses.iter().position(|e| e.id == id).ok_or_else(not_found)?;
        Ok(expenses.remove(index))
    }

    async fn create_invoice(
        &self,
        _token: &Credential,
        owner: i64,
        draft: &InvoiceDraft,
    ) -> Result<Invoice, TransportError> {
        self.enter(format!("create_invoice:{owner}"))?;
        let created = Invoice {
            id: self.next_id(),
            date: Some(draft.date.clone()),
            customer_name: draft.customer_name.clone(),
            amount: draft.amount,
            owner_id: Some(owner),
        };
        self.invoices.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn list_invoices(&self, _token: &Credential, _page: Page) -> Result<Vec<Invoice>, TransportError> {
        self.enter("list_invoices")?;
        Ok(self.invoices.lock().unwrap().clone())
    }

    async fn get_invoice(&self, _token: &Credential, id: i64) -> Result<Invoice, TransportError> {
        self.enter(format!("get_invoice:{id}"))?;
        self.invoices.lock().unwrap().iter().find(|i| i.id == id).cloned().ok_or_else(not_found)
    }

    async fn update_invoice(
        &self,
        _token: &Credential,
        id: i64,
        draft: &InvoiceDraft,
    ) -> Result<Invoice, TransportError> {
        self.enter(format!("update_invoice:{id}"))?;
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices.iter_mut().find(|i| i.id == id).ok_or_else(not_found)?;
        invoice.customer_name.clone_from(&draft.customer_name);
        invoice.amount = draft.amount;
        invoice.date = Some(draft.date.clone());
        Ok(invoice.clone())
    }

    async fn delete_invoice(&self, _token: &Credential, id: i64) -> Result<Invoice, TransportError> {
        self.enter(format!("delete_invoice:{id}"))?;
        let mut invoices = self.invoices.lock().unwrap();
        let index = invoices.iter().position(|i| i.id == id).ok_or_else(not_found)?;
        Ok(invoices.remove(index))
    }
}

// =========================================================================
// MockAudioSource
// =========================================================================

/// A microphone that delivers `clip` when stopped, or refuses to start.
pub struct MockAudioSource {
    available: bool,
    clip: Vec<u8>,
    start_gate: Option<Arc<Notify>>,
    pub starts: AtomicUsize,
}

impl MockAudioSource {
    pub fn with_clip(clip: &[u8]) -> Self {
        Self { available: true, clip: clip.to_vec(), start_gate: None, starts: AtomicUsize::new(0) }
    }

    pub fn unavailable() -> Self {
        Self { available: false, clip: Vec::new(), start_gate: None, starts: AtomicUsize::new(0) }
    }

    /// `start` waits for one `notify_one` on `gate` before opening the microphone.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AudioSource for MockAudioSource {
    async fn start(&self) -> Result<Box<dyn Recording>, CaptureError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.start_gate {
            gate.notified().await;
        }
        if !self.available {
            return Err(CaptureError::Unavailable("permission denied".into()));
        }
        let (mut sink, recording) = ChunkRecording::channel("audio/webm", "webm");
        let clip = self.clip.clone();
        tokio::spawn(async move {
            if !clip.is_empty() {
                sink.push(clip).await;
            }
            sink.stopped().await;
        });
        Ok(Box::new(recording))
    }
}
