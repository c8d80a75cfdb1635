//! Outbound notification transports

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        subject: &str,
        recipients: &[String],
        from: &str,
        body: &str,
    ) -> Result<(), NotifierError>;
}

#[async_trait]
pub trait PushPublisher: Send + Sync {
    /// Publish to one platform endpoint registered for a user
    async fn publish(&self, endpoint: &str, message: &str) -> Result<(), NotifierError>;
}

/// One Slack webhook post
#[derive(Debug, Clone, PartialEq)]
pub struct SlackMessage {
    pub webhook_url: String,
    pub channel: String,
    pub username: String,
    pub emoji: String,
    pub text: String,
}

#[async_trait]
pub trait SlackPoster: Send + Sync {
    async fn post(&self, message: &SlackMessage) -> Result<(), NotifierError>;
}

/// Email transport that only logs
#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(
        &self,
        subject: &str,
        recipients: &[String],
        from: &str,
        _body: &str,
    ) -> Result<(), NotifierError> {
        tracing::info!(
            recipients = ?recipients,
            from = %from,
            "Email notification: {}",
            subject
        );
        Ok(())
    }
}

/// Push transport that only logs
#[derive(Debug, Default, Clone)]
pub struct LogPushPublisher;

#[async_trait]
impl PushPublisher for LogPushPublisher {
    async fn publish(&self, endpoint: &str, message: &str) -> Result<(), NotifierError> {
        if endpoint.trim().is_empty() {
            return Err(NotifierError::Push("empty endpoint".to_string()));
        }
        tracing::info!(endpoint = %endpoint, "Push notification: {}", message);
        Ok(())
    }
}

/// Posts to Slack incoming webhooks
#[derive(Debug, Clone)]
pub struct SlackWebhookPoster {
    client: reqwest::Client,
}

impl SlackWebhookPoster {
    pub fn new(timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Slack(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SlackPoster for SlackWebhookPoster {
    async fn post(&self, message: &SlackMessage) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "channel": message.channel,
            "username": message.username,
            "icon_emoji": message.emoji,
            "text": message.text,
        });

        let response = self
            .client
            .post(&message.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Slack(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Slack(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(channel = %message.channel, "Slack notification sent");
        Ok(())
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Email error: {0}")]
    Email(String),

    #[error("Push error: {0}")]
    Push(String),

    #[error("Slack error: {0}")]
    Slack(String),
}
