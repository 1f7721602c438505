use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{ValidationResult, Validator};
use crate::inbound::normalizer::is_plausible_address;

// ============================================================================
// Database Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueEntry {
    pub id: String,
    pub to_address: String,
    pub to_name: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub reply_to_address: Option<String>,
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub priority: i64,
    pub scheduled_at: String,
    pub status: String,
    pub retry_count: i64,
    pub max_retries: i64,
    pub error_message: Option<String>,
    pub thread_id: Option<String>,
    #[serde(skip_serializing)]
    pub claim_token: Option<String>,
    pub claimed_at: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    InFlight,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InFlight => "in_flight",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(QueueStatus::Pending),
            "in_flight" => Some(QueueStatus::InFlight),
            "sent" => Some(QueueStatus::Sent),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

// ============================================================================
// Request/Response Models
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueRequest {
    pub to_address: String,
    pub to_name: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub reply_to_address: Option<String>,
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub priority: Option<i64>,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS`; now when absent
    pub scheduled_at: Option<String>,
    pub max_retries: Option<i64>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl Validator<EnqueueRequest> for EnqueueRequest {
    fn validate(&self, data: &EnqueueRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.to_address.trim().is_empty() {
            result.add_error("to_address", "is required");
        } else if !is_plausible_address(data.to_address.trim()) {
            result.add_error("to_address", "is not a valid email address");
        }

        for (field, value) in [
            ("from_address", &data.from_address),
            ("reply_to_address", &data.reply_to_address),
        ] {
            if let Some(address) = value.as_deref().map(str::trim) {
                if !address.is_empty() && !is_plausible_address(address) {
                    result.add_error(field, "is not a valid email address");
                }
            }
        }

        if data.subject.trim().is_empty() {
            result.add_error("subject", "is required");
        }

        let has_body = [&data.html_content, &data.text_content]
            .iter()
            .any(|b| b.as_deref().is_some_and(|s| !s.trim().is_empty()));
        if !has_body {
            result.add_error("body", "html_content or text_content is required");
        }

        if let Some(max) = data.max_retries {
            if !(1..=20).contains(&max) {
                result.add_error("max_retries", "must be between 1 and 20");
            }
        }

        result
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    pub batch_size: Option<u32>,
}

/// Outcome of one processor pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    /// Entries claimed and attempted
    pub processed: u32,
    pub sent: u32,
    /// Failed attempts put back to pending
    pub retried: u32,
    pub failed: u32,
    /// Due entries another processor claimed first
    pub skipped: u32,
    /// Stale in-flight claims returned to pending before the pass
    pub reclaimed: u32,
}

#[derive(Debug, Deserialize)]
pub struct QueueListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}
