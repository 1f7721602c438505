//! Inbox persistence
//!
//! Row-level writes take a `&mut SqliteConnection` so callers can group them
//! with other statements in one transaction. Reads that stand alone go through
//! `InboxStore`.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::models::{InboundEmail, InboxStatus};
use crate::common::{generate_inbound_email_id, ApiError};

const DEFAULT_INBOX_LIMIT: i64 = 50;
const MAX_INBOX_LIMIT: i64 = 200;

/// Row to insert; `id` and `received_at` are assigned on insert
#[derive(Debug, Clone)]
pub struct NewInboundEmail {
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
    pub status: InboxStatus,
    pub envelope: Option<String>,
}

pub async fn insert_email(
    conn: &mut SqliteConnection,
    email: &NewInboundEmail,
) -> Result<String, ApiError> {
    let id = generate_inbound_email_id();

    sqlx::query(
        r#"
        INSERT INTO inbound_emails (
            id, thread_id, client_id, message_id, in_reply_to,
            from_address, from_name, to_address, subject,
            text_content, html_content, reply_to_address,
            status, envelope, received_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
        "#,
    )
    .bind(&id)
    .bind(&email.thread_id)
    .bind(&email.client_id)
    .bind(&email.message_id)
    .bind(&email.in_reply_to)
    .bind(&email.from_address)
    .bind(&email.from_name)
    .bind(&email.to_address)
    .bind(&email.subject)
    .bind(&email.text_content)
    .bind(&email.html_content)
    .bind(&email.reply_to_address)
    .bind(email.status.as_str())
    .bind(&email.envelope)
    .execute(&mut *conn)
    .await
    .map_err(ApiError::DatabaseError)?;

    debug!(
        email_id = %id,
        thread_id = %email.thread_id,
        status = email.status.as_str(),
        "Inbox row inserted"
    );

    Ok(id)
}

/// Key a stored row is deduplicated under: its client, or the destination
/// address for unmatched mail. Mirrors the unique index on `inbound_emails`.
pub fn dedupe_scope<'a>(client_id: Option<&'a str>, to_address: &'a str) -> &'a str {
    client_id.unwrap_or(to_address)
}

/// Row already stored for this Message-ID under the same owner
pub async fn find_duplicate(
    conn: &mut SqliteConnection,
    message_id: &str,
    scope: &str,
) -> Result<Option<InboundEmail>, ApiError> {
    sqlx::query_as::<_, InboundEmail>(
        "SELECT * FROM inbound_emails WHERE message_id = ? AND COALESCE(client_id, to_address) = ?",
    )
    .bind(message_id)
    .bind(scope)
    .fetch_optional(&mut *conn)
    .await
    .map_err(ApiError::DatabaseError)
}

/// Latest received row of the thread that came from outside (not our own reply)
pub async fn latest_inbound_in_thread(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<Option<InboundEmail>, ApiError> {
    sqlx::query_as::<_, InboundEmail>(
        r#"
        SELECT * FROM inbound_emails
        WHERE thread_id = ? AND status != 'sent' AND from_address != ''
        ORDER BY datetime(received_at) DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(thread_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(ApiError::DatabaseError)
}

pub struct InboxStore {
    db: SqlitePool,
}

impl InboxStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// All rows of a thread, oldest first, returned as they were before this
    /// fetch marked the unread ones read.
    pub async fn fetch_thread_and_mark_read(
        &self,
        thread_id: &str,
    ) -> Result<Vec<InboundEmail>, ApiError> {
        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        let emails = sqlx::query_as::<_, InboundEmail>(
            r#"
            SELECT * FROM inbound_emails
            WHERE thread_id = ?
            ORDER BY datetime(received_at) ASC, rowid ASC
            "#,
        )
        .bind(thread_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        if emails.is_empty() {
            return Err(ApiError::NotFound("Thread not found".to_string()));
        }

        let marked = sqlx::query(
            "UPDATE inbound_emails SET status = 'read' WHERE thread_id = ? AND status = 'unread'",
        )
        .bind(thread_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?
        .rows_affected();

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        if marked > 0 {
            info!(thread_id = %thread_id, marked = marked, "Thread marked read");
        }

        Ok(emails)
    }

    /// Newest first. `limit` defaults to 50 and is capped at 200.
    pub async fn list_for_client(
        &self,
        client_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<InboundEmail>, ApiError> {
        let limit = limit
            .unwrap_or(DEFAULT_INBOX_LIMIT)
            .clamp(1, MAX_INBOX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);

        sqlx::query_as::<_, InboundEmail>(
            r#"
            SELECT * FROM inbound_emails
            WHERE client_id = ?
            ORDER BY datetime(received_at) DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(client_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(ApiError::DatabaseError)
    }
}
