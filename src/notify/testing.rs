//! Transports that record instead of sending

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::dispatcher::Transports;
use super::transports::{EmailSender, NotifierError, PushPublisher, SlackMessage, SlackPoster};

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub subject: String,
    pub recipients: Vec<String>,
    pub from: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct Recorded {
    emails: Mutex<Vec<SentEmail>>,
    pushes: Mutex<Vec<(String, String)>>,
    slack: Mutex<Vec<SlackMessage>>,
    fail_email: AtomicBool,
    dead_endpoints: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingTransports {
    inner: Arc<Recorded>,
}

impl RecordingTransports {
    pub fn transports(&self) -> Transports {
        Transports {
            email: Arc::new(self.clone()),
            push: Arc::new(self.clone()),
            slack: Arc::new(self.clone()),
        }
    }

    pub fn fail_email(&self, fail: bool) {
        self.inner.fail_email.store(fail, Ordering::SeqCst);
    }

    /// Make every publish to `endpoint` fail
    pub fn kill_push_endpoint(&self, endpoint: &str) {
        self.inner.dead_endpoints.lock().push(endpoint.to_string());
    }

    pub fn emails(&self) -> Vec<SentEmail> {
        self.inner.emails.lock().clone()
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        self.inner.pushes.lock().clone()
    }

    pub fn slack_posts(&self) -> Vec<SlackMessage> {
        self.inner.slack.lock().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingTransports {
    async fn send(
        &self,
        subject: &str,
        recipients: &[String],
        from: &str,
        body: &str,
    ) -> Result<(), NotifierError> {
        if self.inner.fail_email.load(Ordering::SeqCst) {
            return Err(NotifierError::Email("smtp unavailable".to_string()));
        }
        self.inner.emails.lock().push(SentEmail {
            subject: subject.to_string(),
            recipients: recipients.to_vec(),
            from: from.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl PushPublisher for RecordingTransports {
    async fn publish(&self, endpoint: &str, message: &str) -> Result<(), NotifierError> {
        if self.inner.dead_endpoints.lock().iter().any(|e| e == endpoint) {
            return Err(NotifierError::Push(format!("endpoint {} is disabled", endpoint)));
        }
        self.inner
            .pushes
            .lock()
            .push((endpoint.to_string(), message.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SlackPoster for RecordingTransports {
    async fn post(&self, message: &SlackMessage) -> Result<(), NotifierError> {
        self.inner.slack.lock().push(message.clone());
        Ok(())
    }
}
