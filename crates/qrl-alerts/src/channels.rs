//! Notification channels: webhook POST and email via an HTTP mail gateway.

use async_trait::async_trait;
use reqwest::Client;

use crate::model::AlertEvent;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("delivery timed out")]
    Timeout,

    #[error("destination returned status {0}")]
    Status(u16),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

/// One delivery mechanism. Returns the upstream response code on success.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, alert: &AlertEvent, address: &str) -> Result<u16, ChannelError>;
}

/// POSTs the alert JSON to the destination URL.
pub struct WebhookChannel {
    client: Client,
}

impl WebhookChannel {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn deliver(&self, alert: &AlertEvent, address: &str) -> Result<u16, ChannelError> {
        let response = self
            .client
            .post(address)
            .json(alert)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ChannelError::Timeout
                } else {
                    ChannelError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ChannelError::Status(status.as_u16()))
        }
    }
}

/// Sends mail through an HTTP gateway (`ALERT_EMAIL_GATEWAY`); the SMTP
/// relay behind it is an external collaborator.
pub struct EmailChannel {
    client: Client,
    gateway_url: Option<String>,
}

impl EmailChannel {
    pub fn new(client: Client, gateway_url: Option<String>) -> Self {
        Self {
            client,
            gateway_url,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn deliver(&self, alert: &AlertEvent, address: &str) -> Result<u16, ChannelError> {
        let Some(gateway) = &self.gateway_url else {
            return Err(ChannelError::NotConfigured("email gateway".to_string()));
        };

        let body = serde_json::json!({
            "to": address,
            "subject": format!("[{}] {}", alert.severity.as_str(), alert.summary),
            "alert": alert,
        });

        let response = self
            .client
            .post(gateway)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ChannelError::Timeout
                } else {
                    ChannelError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ChannelError::Status(status.as_u16()))
        }
    }
}
