//! Email delivery for digests and reset links

use std::time::Duration;

use async_trait::async_trait;

/// Sends one HTML email to one address
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifierError>;
}

/// Resend transactional email API settings
#[derive(Debug, Clone)]
pub struct ResendConfig {
    /// Endpoint for `POST /emails`
    pub api_url: String,
    pub api_key: String,
    /// Verified sender address
    pub from: String,
    pub timeout: Duration,
}

/// Delivers through the Resend HTTP API
pub struct ResendNotifier {
    client: reqwest::Client,
    config: ResendConfig,
}

impl ResendNotifier {
    pub fn new(config: ResendConfig) -> Result<Self, NotifierError> {
        if config.api_key.trim().is_empty() || config.from.trim().is_empty() {
            return Err(NotifierError::NotConfigured);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifierError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "from": self.config.from,
            "to": to,
            "subject": subject,
            "html": html_body,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from))
            .unwrap_or_else(|| "N/A".to_string());

        tracing::info!(to = %to, id = %id, "Email sent");
        Ok(())
    }
}

/// Writes emails to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifierError> {
        tracing::warn!(
            to = %to,
            subject = %subject,
            bytes = html_body.len(),
            "Email delivery not configured, message logged only"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Email transport error: {0}")]
    Transport(String),

    #[error("Email provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Email delivery is not configured")]
    NotConfigured,
}
