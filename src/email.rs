use crate::config::EmailConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// The provider refused the message itself (bad recipient, bad sender...)
    #[error("email rejected by provider: {0}")]
    Rejected(String),

    #[error("email provider returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("email transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("email sender is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Sends through a transactional email provider's JSON API
pub struct HttpEmailSender {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ProviderPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

impl HttpEmailSender {
    pub fn new(client: Client, endpoint: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            from: from.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `None` when no provider endpoint is configured
    pub fn from_config(cfg: &EmailConfig) -> Option<Self> {
        let endpoint = cfg.endpoint.as_deref().filter(|e| !e.trim().is_empty())?;
        let mut sender = Self::new(Client::new(), endpoint, cfg.from.clone())
            .with_timeout(Duration::from_secs(cfg.timeout_seconds));
        if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.is_empty()) {
            sender = sender.with_api_key(key);
        }
        Some(sender)
    }
}

/// Pull the provider's own explanation out of an error body
fn provider_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        if message.to.is_empty() {
            return Err(EmailError::Rejected("no recipients".to_string()));
        }

        let payload = ProviderPayload {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html_body,
            text: &message.text_body,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(recipients = message.to.len(), subject = %message.subject, "Email sent");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status.is_client_error() {
            Err(EmailError::Rejected(provider_message(&body)))
        } else {
            Err(EmailError::Status { status, body })
        }
    }
}
