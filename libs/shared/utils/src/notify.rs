//! Outbound notifications (OTP codes, reminders, appointment updates).
//!
//! Delivery is fire-and-forget: callers go through [`notify_best_effort`],
//! which logs a failed send and never retries it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub message: String,
    pub channel: NotificationChannel,
}

impl Notification {
    pub fn new(recipient_id: Uuid, message: impl Into<String>, channel: NotificationChannel) -> Self {
        Self {
            recipient_id,
            message: message.into(),
            channel,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Notification rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log. Used when no webhook is configured.
/// Message bodies can carry login codes, so they only go out at debug.
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            recipient = %notification.recipient_id,
            channel = ?notification.channel,
            "Notification queued"
        );
        debug!(recipient = %notification.recipient_id, "Notification body: {}", notification.message);
        Ok(())
    }
}

/// POSTs each notification as JSON to an external delivery service.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, WEBHOOK_TIMEOUT)
    }

    /// A slow delivery service gives up after `timeout` instead of holding
    /// the caller.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Send without failing the caller. Returns whether delivery succeeded.
pub async fn notify_best_effort(sender: &dyn NotificationSender, notification: Notification) -> bool {
    match sender.send(&notification).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                recipient = %notification.recipient_id,
                channel = ?notification.channel,
                "Notification delivery failed: {}",
                e
            );
            false
        }
    }
}
