// src/services/aws.rs
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::config::{Credentials, Region};
use aws_sdk_sesv2::Client as SesClient;
use std::env;
use thiserror::Error;
use tracing::{error, info};

use crate::common::safe_email_log;

#[derive(Debug, Error)]
pub enum AWSError {
    #[error("AWS credentials not configured")]
    NotConfigured,

    #[error("SES operation failed: {0}")]
    SESError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct SesConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Used when a queue entry carries no from address
    pub default_from_email: String,
}

impl SesConfig {
    pub fn from_env() -> Result<Self, AWSError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AWSError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let access_key_id = read("AWS_ACCESS_KEY_ID").ok_or(AWSError::NotConfigured)?;
        let secret_access_key = read("AWS_SECRET_ACCESS_KEY").ok_or(AWSError::NotConfigured)?;
        let region = read("AWS_SES_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let default_from_email = read("AWS_SES_FROM_EMAIL").ok_or_else(|| {
            AWSError::InvalidConfig("SES from email not configured".to_string())
        })?;

        Ok(Self {
            access_key_id,
            secret_access_key,
            region,
            default_from_email,
        })
    }
}

/// One message as SES sees it
#[derive(Debug, Clone)]
pub struct SesEmail {
    pub to: String,
    pub from: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

/// `Name <addr>` when a usable display name exists
pub fn format_mailbox(name: Option<&str>, address: &str) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let cleaned: String = name.chars().filter(|c| !matches!(c, '"' | '<' | '>')).collect();
            format!("\"{}\" <{}>", cleaned, address)
        }
        None => address.to_string(),
    }
}

pub struct AWSService {
    config: SesConfig,
    client: SesClient,
}

impl AWSService {
    pub async fn new(config: SesConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "environment",
        );

        let region = Region::new(config.region.clone());

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .load()
            .await;

        let client = SesClient::new(&aws_config);

        info!(region = %config.region, "SES client initialized");

        Self { config, client }
    }

    /// Send one email via SES. Returns the SES message id.
    pub async fn send_email(&self, email: &SesEmail) -> Result<String, AWSError> {
        use aws_sdk_sesv2::types::{Body as SesBody, Content, Destination, EmailContent, Message};

        let from = email
            .from
            .clone()
            .unwrap_or_else(|| self.config.default_from_email.clone());

        let destination = Destination::builder()
            .to_addresses(email.to.clone())
            .build();

        let subject_content = Content::builder()
            .data(&email.subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| AWSError::SESError(format!("Failed to build subject: {}", e)))?;

        let mut ses_body = SesBody::builder();
        if let Some(html) = &email.html {
            let html_content = Content::builder()
                .data(html)
                .charset("UTF-8")
                .build()
                .map_err(|e| AWSError::SESError(format!("Failed to build html body: {}", e)))?;
            ses_body = ses_body.html(html_content);
        }
        if let Some(text) = &email.text {
            let text_content = Content::builder()
                .data(text)
                .charset("UTF-8")
                .build()
                .map_err(|e| AWSError::SESError(format!("Failed to build text body: {}", e)))?;
            ses_body = ses_body.text(text_content);
        }

        let message = Message::builder()
            .subject(subject_content)
            .body(ses_body.build())
            .build();

        let email_content = EmailContent::builder().simple(message).build();

        let mut request = self
            .client
            .send_email()
            .from_email_address(&from)
            .destination(destination)
            .content(email_content);
        if let Some(reply_to) = &email.reply_to {
            request = request.reply_to_addresses(reply_to.clone());
        }

        let result = request.send().await.map_err(|e| {
            error!(error = %e, to = %safe_email_log(&email.to), "Failed to send email via SES");
            AWSError::SESError(format!("Send failed: {}", e))
        })?;

        let message_id = result
            .message_id()
            .map(str::to_string)
            .ok_or_else(|| AWSError::SESError("SES returned no message id".to_string()))?;

        info!(
            to = %safe_email_log(&email.to),
            message_id = %message_id,
            "Email sent successfully via SES"
        );

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_not_configured() {
        let result = SesConfig::from_lookup(lookup(&[]));
        assert!(matches!(result.unwrap_err(), AWSError::NotConfigured));
    }

    #[test]
    fn test_config_requires_from_email() {
        let result = SesConfig::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "key"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ]));
        assert!(matches!(result.unwrap_err(), AWSError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_with_values() {
        let config = SesConfig::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "test_key_id"),
            ("AWS_SECRET_ACCESS_KEY", "test_secret"),
            ("AWS_SES_FROM_EMAIL", "noreply@interviewsfirst.com"),
        ]))
        .unwrap();

        assert_eq!(config.access_key_id, "test_key_id");
        assert_eq!(config.secret_access_key, "test_secret");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.default_from_email, "noreply@interviewsfirst.com");
    }

    #[test]
    fn test_format_mailbox() {
        assert_eq!(format_mailbox(None, "a@x.com"), "a@x.com");
        assert_eq!(format_mailbox(Some("  "), "a@x.com"), "a@x.com");
        assert_eq!(
            format_mailbox(Some("Jane \"JD\" Doe"), "a@x.com"),
            "\"Jane JD Doe\" <a@x.com>"
        );
    }
}
