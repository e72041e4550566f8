//! Outbound account emails.
//!
//! The engine decides when an email goes out and which ticket link it
//! carries. Delivery is behind [`EmailSender`].

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::config::ArtifactSecret;
use crate::errors::NotificationError;
use crate::oauth::crypto::hmac_sha256;

/// Header carrying the webhook body signature
pub const SIGNATURE_HEADER: &str = "X-Vsauth-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    VerifyEmail,
    PasswordReset,
    BlockedAccount,
}

/// One email to deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub kind: EmailKind,
    pub to: String,
    pub user_id: String,
    pub first_name: Option<String>,
    pub client_id: String,
    pub client_name: String,
    /// Ticket link the recipient follows
    pub action_url: String,
    pub request_ip: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Logs emails instead of delivering them
#[derive(Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        // action_url holds a live ticket; only the kind and recipient are logged
        tracing::info!(
            kind = ?message.kind,
            user_id = %message.user_id,
            client_id = %message.client_id,
            "email delivery skipped, no transport configured"
        );
        Ok(())
    }
}

/// Keeps sent emails in memory
#[derive(Default)]
pub struct MemoryEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MemoryEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Most recent email of `kind`
    pub fn last_of(&self, kind: EmailKind) -> Option<EmailMessage> {
        self.sent().into_iter().rev().find(|m| m.kind == kind)
    }
}

#[async_trait]
impl EmailSender for MemoryEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| NotificationError::DeliveryFailed(format!("Lock error: {}", e)))?;
        sent.push(message.clone());
        Ok(())
    }
}

/// POSTs each email as signed JSON to a webhook
pub struct WebhookEmailSender {
    http_client: reqwest::Client,
    url: String,
    secret: Option<ArtifactSecret>,
}

impl WebhookEmailSender {
    pub fn new(http_client: reqwest::Client, url: String, secret: Option<ArtifactSecret>) -> Self {
        Self {
            http_client,
            url,
            secret,
        }
    }

    fn body(message: &EmailMessage) -> Result<String, NotificationError> {
        let payload = serde_json::json!({
            "email": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        serde_json::to_string(&payload).map_err(|e| NotificationError::EncodingFailed(e.to_string()))
    }
}

#[async_trait]
impl EmailSender for WebhookEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let body = Self::body(message)?;

        let mut request = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.secret {
            let signature = hmac_sha256(&body, secret.expose())
                .map_err(|e| NotificationError::EncodingFailed(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotificationError::DeliveryFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(NotificationError::DeliveryFailed(format!(
                "Webhook returned {}: {}",
                status, error
            )));
        }

        tracing::debug!(kind = ?message.kind, user_id = %message.user_id, "email delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            kind: EmailKind::BlockedAccount,
            to: "alice@example.com".to_string(),
            user_id: "user-1".to_string(),
            first_name: Some("Alice".to_string()),
            client_id: "client-1".to_string(),
            client_name: "Example App".to_string(),
            action_url: "https://auth.example.com/tickets/unblock-account?ticket=abc".to_string(),
            request_ip: "10.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_sender_records() {
        let sender = MemoryEmailSender::new();
        sender.send(&message()).await.unwrap();
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(
            sender.last_of(EmailKind::BlockedAccount).unwrap().to,
            "alice@example.com"
        );
        assert!(sender.last_of(EmailKind::VerifyEmail).is_none());
    }

    #[test]
    fn test_webhook_body_shape() {
        let body = WebhookEmailSender::body(&message()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["email"]["kind"], "blocked_account");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_log_sender_never_fails() {
        assert!(LogEmailSender.send(&message()).await.is_ok());
    }
}
