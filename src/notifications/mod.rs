//! Customer notification delivery.
//!
//! Delivery is fire-and-forget from the order pipeline's point of view: the
//! event worker calls a `NotificationSink` and only logs when it fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmation,
    OrderShipped,
}

/// Message addressed to the customer of one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub order_id: Uuid,
    pub order_number: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log; used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            order_id = %notification.order_id,
            kind = ?notification.kind,
            phone = notification.phone.as_deref().unwrap_or("-"),
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Posts notifications as JSON to an SMS/e-mail gateway webhook.
#[derive(Clone)]
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    base_backoff: Duration,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_retry(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_backoff = base_backoff;
        self
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    #[instrument(skip(self, notification), fields(order_id = %notification.order_id))]
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        for attempt in 1..=self.max_retries {
            match self.client.post(&self.url).json(notification).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Notification delivered to {}", self.url);
                    return Ok(());
                }
                Ok(response) => warn!(
                    "Notification delivery failed with status: {} (attempt {}/{})",
                    response.status(),
                    attempt,
                    self.max_retries
                ),
                Err(e) => warn!(
                    "Notification delivery error: {} (attempt {}/{})",
                    e, attempt, self.max_retries
                ),
            }

            // Exponential backoff: base, 2x base, 4x base
            if attempt < self.max_retries {
                tokio::time::sleep(self.base_backoff * 2_u32.pow(attempt - 1)).await;
            }
        }

        Err(NotificationError::Delivery(format!(
            "gave up after {} attempts",
            self.max_retries
        )))
    }
}
