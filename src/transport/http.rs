//! reqwest implementation of [`Backend`].

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{TextRequest, TokenResponse};
use super::{Account, AudioReply, Backend, Expense, Invoice, InvoiceDraft, NewAccount, Page, TextReply, TransportError};
use crate::capture::AudioClip;
use crate::config::{ClientConfig, Timeouts};
use crate::expense::ExpenseDraft;
use crate::message::{ExtractedFields, ImageRef, MonthlySummary};
use crate::session::Credential;

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns `ClientBuild` if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeouts: Timeouts) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// # Errors
    ///
    /// Returns `ClientBuild` if the HTTP client cannot be constructed.
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(&config.base_url, config.timeouts)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and decode a JSON success body; classify everything else.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder + Send,
    ) -> Result<T, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, path, "backend request");

        let response = build(self.http.request(method.clone(), url))
            .send()
            .await
            .map_err(|e| {
                let err = TransportError::from_send(&e);
                tracing::warn!(%method, path, error = %err, "backend unreachable");
                err
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            let err = TransportError::from_status(status, text);
            tracing::warn!(%method, path, status, error = %err, "backend rejected request");
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| TransportError::Decode(format!("{path}: {e}")))
    }
}

fn file_part(bytes: Vec<u8>, file_name: &str, mime: &str) -> Result<Part, TransportError> {
    Part::bytes(bytes)
        .file_name(file_name.to_owned())
        .mime_str(mime)
        .map_err(|e| TransportError::InvalidUpload(format!("{file_name}: {e}")))
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn login(&self, email: &str, password: &str) -> Result<Credential, TransportError> {
        let form = [("username", email), ("password", password)];
        let token: TokenResponse = self
            .execute(Method::POST, "/token", |req| req.form(&form))
            .await?;
        Ok(Credential::new(token.access_token))
    }

    async fn register(&self, account: &NewAccount) -> Result<Account, TransportError> {
        self.execute(Method::POST, "/users/", |req| req.json(account))
            .await
    }

    async fn health(&self) -> Result<Value, TransportError> {
        self.execute(Method::GET, "/health", |req| req).await
    }

    async fn send_text(&self, token: &Credential, text: &str) -> Result<TextReply, TransportError> {
        let body = TextRequest { text };
        self.execute(Method::POST, "/webhook/text", |req| req.bearer_auth(token.expose()).json(&body))
            .await
    }

    async fn send_image(&self, token: &Credential, image: &ImageRef) -> Result<ExtractedFields, TransportError> {
        let part = file_part(image.bytes.to_vec(), &image.file_name, &image.mime)?;
        let form = Form::new().part("image", part);
        self.execute(Method::POST, "/webhook/image", |req| req.bearer_auth(token.expose()).multipart(form))
            .await
    }

    async fn send_audio(
        &self,
        token: &Credential,
        from_number: &str,
        clip: &AudioClip,
    ) -> Result<AudioReply, TransportError> {
        let part = file_part(clip.bytes.clone(), &clip.file_name, &clip.mime)?;
        let form = Form::new()
            .text("from_number", from_number.to_owned())
            .part("audio", part);
        // The backend reads `from_number` from the query string.
        let query = [("from_number", from_number)];
        self.execute(Method::POST, "/webhook/audio", |req| {
            req.bearer_auth(token.expose())
                .query(&query)
                .multipart(form)
        })
        .await
    }

    async fn monthly_summary(&self, token: &Credential) -> Result<MonthlySummary, TransportError> {
        self.execute(Method::GET, "/summary/monthly", |req| req.bearer_auth(token.expose()))
            .await
    }

    async fn confirm_expense(&self, token: &Credential, draft: &ExpenseDraft) -> Result<Value, TransportError> {
        self.execute(Method::POST, "/expenses/confirm_ocr", |req| req.bearer_auth(token.expose()).json(draft))
            .await
    }

    async fn create_expense(
        &self,
        token: &Credential,
        owner: i64,
        draft: &ExpenseDraft,
    ) -> Result<Expense, TransportError> {
        let path = format!("/users/{owner}/expenses/");
        self.execute(Method::POST, &path, |req| req.bearer_auth(token.expose()).json(draft))
            .await
    }

    async fn list_expenses(&self, token: &Credential, page: Page) -> Result<Vec<Expense>, TransportError> {
        self.execute(Method::GET, "/expenses/", |req| req.bearer_auth(token.expose()).query(&page))
            .await
    }

    async fn get_expense(&self, token: &Credential, id: i64) -> Result<Expense, TransportError> {
        let path = format!("/expenses/{id}");
        self.execute(Method::GET, &path, |req| req.bearer_auth(token.expose()))
            .await
    }

    async fn update_expense(
        &self,
        token: &Credential,
        id: i64,
        draft: &ExpenseDraft,
    ) -> Result<Expense, TransportError> {
        let path = format!("/expenses/{id}");
        self.execute(Method::PUT, &path, |req| req.bearer_auth(token.expose()).json(draft))
            .await
    }

    async fn delete_expense(&self, token: &Credential, id: i64) -> Result<Expense, TransportError> {
        let path = format!("/expenses/{id}");
        self.execute(Method::DELETE, &path, |req| req.bearer_auth(token.expose()))
            .await
    }

    async fn create_invoice(
        &self,
        token: &Credential,
        owner: i64,
        draft: &InvoiceDraft,
    ) -> Result<Invoice, TransportError> {
        let path = format!("/users/{owner}/invoices/");
        self.execute(Method::POST, &path, |req| req.bearer_auth(token.expose()).json(draft))
            .await
    }

    async fn list_invoices(&self, token: &Credential, page: Page) -> Result<Vec<Invoice>, TransportError> {
        self.execute(Method::GET, "/invoices/", |req| req.bearer_auth(token.expose()).query(&page))
            .await
    }

    async fn get_invoice(&self, token: &Credential, id: i64) -> Result<Invoice, TransportError> {
        let path = format!("/invoices/{id}");
        self.execute(Method::GET, &path, |req| req.bearer_auth(token.expose()))
            .await
    }

    async fn update_invoice(
        &self,
        token: &Credential,
        id: i64,
        draft: &InvoiceDraft,
    ) -> Result<Invoice, TransportError> {
        let path = format!("/invoices/{id}");
        self.execute(Method::PUT, &path, |req| req.bearer_auth(token.expose()).json(draft))
            .await
    }

    async fn delete_invoice(&self, token: &Credential, id: i64) -> Result<Invoice, TransportError> {
        let path = format!("/invoices/{id}");
        self.execute(Method::DELETE, &path, |req| req.bearer_auth(token.expose()))
            .await
    }
}
