//! Email transport abstraction
//!
//! The processor only knows `EmailSender`. Production uses SES; `LogSender`
//! records the message in the log and reports success, for local runs.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::models::QueueEntry;
use crate::common::{generate_raw_id, safe_email_log};
use crate::services::aws::{format_mailbox, AWSError, AWSService, SesEmail};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send attempt timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("email transport not configured")]
    NotConfigured,
}

impl From<AWSError> for SendError {
    fn from(err: AWSError) -> Self {
        match err {
            AWSError::NotConfigured => SendError::NotConfigured,
            other => SendError::Transport(other.to_string()),
        }
    }
}

/// What a transport needs to deliver one queue entry
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to_address: String,
    pub to_name: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub reply_to_address: Option<String>,
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
}

impl From<&QueueEntry> for OutgoingEmail {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            to_address: entry.to_address.clone(),
            to_name: entry.to_name.clone(),
            from_address: entry.from_address.clone(),
            from_name: entry.from_name.clone(),
            reply_to_address: entry.reply_to_address.clone(),
            subject: entry.subject.clone(),
            html_content: entry.html_content.clone(),
            text_content: entry.text_content.clone(),
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one email. Ok carries the provider's message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError>;
}

pub struct SesSender {
    aws: Arc<AWSService>,
}

impl SesSender {
    pub fn new(aws: Arc<AWSService>) -> Self {
        Self { aws }
    }
}

#[async_trait]
impl EmailSender for SesSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
        let ses_email = SesEmail {
            to: format_mailbox(email.to_name.as_deref(), &email.to_address),
            from: email
                .from_address
                .as_deref()
                .map(|addr| format_mailbox(email.from_name.as_deref(), addr)),
            reply_to: email.reply_to_address.clone(),
            subject: email.subject.clone(),
            html: email.html_content.clone(),
            text: email.text_content.clone(),
        };

        Ok(self.aws.send_email(&ses_email).await?)
    }
}

pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
        let message_id = format!("log-{}", generate_raw_id(16).to_lowercase());
        info!(
            to = %safe_email_log(&email.to_address),
            subject = %email.subject,
            message_id = %message_id,
            "EMAIL_TRANSPORT=log: email not delivered"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted sender: pops one outcome per call, succeeding once the script runs out
    pub struct FakeSender {
        outcomes: Mutex<VecDeque<Result<(), String>>>,
        pub delay: Option<Duration>,
        pub sent_to: Mutex<Vec<String>>,
    }

    impl FakeSender {
        pub fn succeeding() -> Self {
            Self::scripted(Vec::new())
        }

        pub fn scripted(outcomes: Vec<Result<(), String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                delay: None,
                sent_to: Mutex::new(Vec::new()),
            }
        }

        pub fn always_failing(times: usize) -> Self {
            Self::scripted(vec![Err("mailbox unavailable".to_string()); times])
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn attempts(&self) -> Vec<String> {
            self.sent_to.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailSender for FakeSender {
        async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let attempt = {
                let mut sent = self.sent_to.lock().unwrap();
                sent.push(email.to_address.clone());
                sent.len()
            };
            let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
            outcome
                .map(|_| format!("fake-{}", attempt))
                .map_err(SendError::Transport)
        }
    }
}
