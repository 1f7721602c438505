//! Thread assignment
//!
//! A thread is only the `thread_id` shared by a set of inbox rows. Inbound
//! mail joins an existing thread when its In-Reply-To or References ids point
//! at a message we already know: either a stored inbound Message-ID or the
//! provider id of a reply we sent from a thread. Anything else starts fresh.
//! Matches are limited to threads owned by the same client, so a reply can
//! never join another client's conversation.

use sqlx::SqliteConnection;
use tracing::debug;

use super::models::CanonicalInbound;
use crate::common::{generate_thread_id, ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPolicy {
    /// Reuse a thread when a correlation key matches
    Correlate,
    /// Manual test path: always a new thread
    AlwaysNew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadAssignment {
    pub thread_id: String,
    /// The key that matched, when the thread was reused
    pub matched_key: Option<String>,
}

/// In-Reply-To first, then References newest to oldest
pub fn correlation_keys(inbound: &CanonicalInbound) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    if let Some(parent) = &inbound.in_reply_to {
        keys.push(parent.clone());
    }
    for reference in inbound.references.iter().rev() {
        if !keys.contains(reference) {
            keys.push(reference.clone());
        }
    }
    keys
}

/// Providers report the bare id while the header carries `id@provider-domain`
fn provider_id_forms(key: &str) -> (String, String) {
    let local = key.split('@').next().unwrap_or(key).to_string();
    (key.to_string(), local)
}

pub struct ThreadAssigner;

impl ThreadAssigner {
    /// `client_id` is the resolved owner of the message; `None` only matches
    /// threads of unmatched mail.
    pub async fn assign(
        conn: &mut SqliteConnection,
        inbound: &CanonicalInbound,
        client_id: Option<&str>,
        policy: ThreadPolicy,
    ) -> Result<ThreadAssignment, ApiError> {
        if policy == ThreadPolicy::Correlate {
            for key in correlation_keys(inbound) {
                if let Some(thread_id) = Self::find_thread(conn, &key, client_id).await? {
                    debug!(thread_id = %thread_id, key = %key, "Inbound email joined existing thread");
                    return Ok(ThreadAssignment {
                        thread_id,
                        matched_key: Some(key),
                    });
                }
            }
        }

        Ok(ThreadAssignment {
            thread_id: generate_thread_id(),
            matched_key: None,
        })
    }

    async fn find_thread(
        conn: &mut SqliteConnection,
        key: &str,
        client_id: Option<&str>,
    ) -> Result<Option<String>, ApiError> {
        let from_inbox = sqlx::query_scalar::<_, String>(
            "SELECT thread_id FROM inbound_emails WHERE message_id = ? AND client_id IS ? LIMIT 1",
        )
        .bind(key)
        .bind(client_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)?;

        if from_inbox.is_some() {
            return Ok(from_inbox);
        }

        let (full, local) = provider_id_forms(key);
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT q.thread_id FROM email_queue q
            WHERE q.thread_id IS NOT NULL
              AND (lower(q.provider_message_id) = ? OR lower(q.provider_message_id) = ?)
              AND EXISTS (
                  SELECT 1 FROM inbound_emails e
                  WHERE e.thread_id = q.thread_id AND e.client_id IS ?
              )
            LIMIT 1
            "#,
        )
        .bind(&full)
        .bind(&local)
        .bind(client_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)
    }
}
