use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Stored rows
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InboundEmail {
    pub id: String,
    pub thread_id: String,
    pub client_id: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_address: String,
    pub subject: String,
    pub text_content: Option<String>,
    pub html_content: Option<String>,
    pub reply_to_address: Option<String>,
    pub status: String,
    pub envelope: Option<String>,
    pub received_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    Unread,
    Read,
    /// Our own reply, recorded in the thread
    Sent,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Unread => "unread",
            InboxStatus::Read => "read",
            InboxStatus::Sent => "sent",
        }
    }
}

/// API shape of a stored row
#[derive(Debug, Clone, Serialize)]
pub struct InboundEmailView {
    pub id: String,
    pub thread_id: String,
    pub client_id: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_address: String,
    pub subject: String,
    pub text_content: Option<String>,
    pub html_content: Option<String>,
    pub reply_to_address: Option<String>,
    pub status: String,
    pub is_read: bool,
    pub received_at: String,
}

impl From<InboundEmail> for InboundEmailView {
    fn from(row: InboundEmail) -> Self {
        let is_read = row.status != InboxStatus::Unread.as_str();
        Self {
            id: row.id,
            thread_id: row.thread_id,
            client_id: row.client_id,
            from_address: row.from_address,
            from_name: row.from_name,
            to_address: row.to_address,
            subject: row.subject,
            text_content: row.text_content,
            html_content: row.html_content,
            reply_to_address: row.reply_to_address,
            status: row.status,
            is_read,
            received_at: row.received_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ThreadView {
    pub thread_id: String,
    pub emails: Vec<InboundEmailView>,
}

// ============================================================================
// Canonical inbound record (output of the normalizer)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalInbound {
    pub from_address: String,
    pub from_name: String,
    /// Primary destination, first of `recipients`
    pub to_address: String,
    /// Lowercased destination candidates, envelope first
    pub recipients: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub reply_to: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub envelope: Option<serde_json::Value>,
}

// ============================================================================
// Request/Response Models
// ============================================================================

/// Either a single string or a list, as providers disagree on `to`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn joined(&self) -> String {
        match self {
            OneOrMany::One(s) => s.clone(),
            OneOrMany::Many(list) => list.join(", "),
        }
    }
}

/// Wire payload before normalization. Both the JSON and the multipart
/// senders are folded into this shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInboundPayload {
    pub from: Option<String>,
    pub to: Option<OneOrMany>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    /// Object, or a JSON document in a string
    pub envelope: Option<serde_json::Value>,
    /// Object of header name to value, or a raw header block
    pub headers: Option<serde_json::Value>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub reply_to: Option<String>,
    pub from_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResult {
    pub id: String,
    pub thread_id: String,
    pub client_id: Option<String>,
    /// True when the Message-ID was already stored; `id` is the existing row
    pub duplicate: bool,
}

#[derive(Debug, Deserialize)]
pub struct ThreadReplyRequest {
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub priority: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ThreadReplyResponse {
    pub thread_id: String,
    pub queue_entry_id: String,
    pub inbox_entry_id: String,
    pub to_address: String,
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
