//! Inbound ingestion and thread replies
//!
//! Ingest order: resolve client, dedupe on Message-ID per client, assign
//! thread, insert.
//! The last three share one transaction.

use sqlx::SqlitePool;
use tracing::{info, warn};

use super::models::{
    CanonicalInbound, IngestResult, InboxStatus, ThreadReplyRequest, ThreadReplyResponse,
};
use super::store::{self, NewInboundEmail};
use super::threads::{ThreadAssigner, ThreadPolicy};
use crate::clients::ClientResolver;
use crate::common::config::{InboundConfig, UnmatchedPolicy};
use crate::common::{safe_email_log, ApiError};
use crate::outbound::models::EnqueueRequest;
use crate::outbound::queue::insert_entry;
use crate::services::email::{
    render_reply_html, render_reply_text, reply_subject, text_to_html, QuotedMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    Webhook,
    /// Admin test endpoint
    ManualTest,
}

impl IngestSource {
    fn thread_policy(&self) -> ThreadPolicy {
        match self {
            IngestSource::Webhook => ThreadPolicy::Correlate,
            IngestSource::ManualTest => ThreadPolicy::AlwaysNew,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            IngestSource::Webhook => "webhook",
            IngestSource::ManualTest => "manual_test",
        }
    }
}

fn is_unique_violation(err: &ApiError) -> bool {
    match err {
        ApiError::DatabaseError(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct InboundReceiver {
    db: SqlitePool,
    config: InboundConfig,
}

impl InboundReceiver {
    pub fn new(db: SqlitePool, config: InboundConfig) -> Self {
        Self { db, config }
    }

    pub async fn ingest(
        &self,
        inbound: CanonicalInbound,
        source: IngestSource,
    ) -> Result<IngestResult, ApiError> {
        let resolved = ClientResolver::new(self.db.clone())
            .resolve_any(&inbound.recipients)
            .await?;

        let (client_id, to_address) = match resolved {
            Some((client_id, matched)) => (Some(client_id), matched),
            None => match self.config.unmatched_policy {
                UnmatchedPolicy::Reject => {
                    warn!(
                        to = %safe_email_log(&inbound.to_address),
                        source = source.as_str(),
                        "Inbound email rejected: no active client for destination"
                    );
                    return Err(ApiError::NotFound(
                        "No active client for destination address".to_string(),
                    ));
                }
                UnmatchedPolicy::Store => {
                    warn!(
                        to = %safe_email_log(&inbound.to_address),
                        source = source.as_str(),
                        "Inbound email stored without client"
                    );
                    (None, inbound.to_address.clone())
                }
            },
        };

        match self
            .insert(&inbound, source, client_id.clone(), to_address.clone())
            .await
        {
            Err(e) if is_unique_violation(&e) => {
                // Lost a race with a concurrent delivery of the same Message-ID
                let mut conn = self.db.acquire().await.map_err(ApiError::DatabaseError)?;
                let message_id = inbound.message_id.as_deref().unwrap_or_default();
                let scope = store::dedupe_scope(client_id.as_deref(), &to_address);
                match store::find_duplicate(&mut conn, message_id, scope).await? {
                    Some(existing) => Ok(IngestResult {
                        id: existing.id,
                        thread_id: existing.thread_id,
                        client_id: existing.client_id,
                        duplicate: true,
                    }),
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    async fn insert(
        &self,
        inbound: &CanonicalInbound,
        source: IngestSource,
        client_id: Option<String>,
        to_address: String,
    ) -> Result<IngestResult, ApiError> {
        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        if let Some(message_id) = &inbound.message_id {
            let scope = store::dedupe_scope(client_id.as_deref(), &to_address);
            if let Some(existing) = store::find_duplicate(&mut tx, message_id, scope).await? {
                tx.rollback().await.map_err(ApiError::DatabaseError)?;
                info!(
                    email_id = %existing.id,
                    message_id = %message_id,
                    "Duplicate inbound email ignored"
                );
                return Ok(IngestResult {
                    id: existing.id,
                    thread_id: existing.thread_id,
                    client_id: existing.client_id,
                    duplicate: true,
                });
            }
        }

        let assignment = ThreadAssigner::assign(
            &mut tx,
            inbound,
            client_id.as_deref(),
            source.thread_policy(),
        )
        .await?;

        let row = NewInboundEmail {
            thread_id: assignment.thread_id.clone(),
            client_id: client_id.clone(),
            message_id: inbound.message_id.clone(),
            in_reply_to: inbound.in_reply_to.clone(),
            from_address: inbound.from_address.clone(),
            from_name: Some(inbound.from_name.clone()),
            to_address,
            subject: inbound.subject.clone(),
            text_content: inbound.text.clone(),
            html_content: inbound.html.clone(),
            reply_to_address: inbound.reply_to.clone(),
            status: InboxStatus::Unread,
            envelope: inbound
                .envelope
                .as_ref()
                .and_then(|v| serde_json::to_string(v).ok()),
        };

        let id = store::insert_email(&mut tx, &row).await?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        info!(
            email_id = %id,
            thread_id = %assignment.thread_id,
            client_id = ?client_id,
            from = %safe_email_log(&inbound.from_address),
            joined_thread = assignment.matched_key.is_some(),
            source = source.as_str(),
            "Inbound email stored"
        );

        Ok(IngestResult {
            id,
            thread_id: assignment.thread_id,
            client_id,
            duplicate: false,
        })
    }

    /// Queue a reply to the latest inbound message of a thread and record it
    /// in the thread as sent.
    pub async fn reply_to_thread(
        &self,
        thread_id: &str,
        request: ThreadReplyRequest,
        default_max_retries: i64,
    ) -> Result<ThreadReplyResponse, ApiError> {
        let reply_text = non_blank(request.text.as_deref());
        let reply_html = non_blank(request.html.as_deref());
        if reply_text.is_none() && reply_html.is_none() {
            return Err(ApiError::ValidationError(
                "body: html or text is required".to_string(),
            ));
        }

        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        let original = store::latest_inbound_in_thread(&mut tx, thread_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Thread not found".to_string()))?;

        let recipient = non_blank(original.reply_to_address.as_deref())
            .unwrap_or(&original.from_address)
            .to_string();
        let subject = non_blank(request.subject.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| reply_subject(&original.subject));

        let client_name = match &original.client_id {
            Some(client_id) => sqlx::query_scalar::<_, String>("SELECT name FROM clients WHERE id = ?")
                .bind(client_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(ApiError::DatabaseError)?,
            None => None,
        };

        let quoted = QuotedMessage {
            from_name: original.from_name.as_deref(),
            from_address: &original.from_address,
            received_at: &original.received_at,
            text: original.text_content.as_deref(),
            html: original.html_content.as_deref(),
        };

        let body_html = match (reply_html, reply_text) {
            (Some(html), _) => html.to_string(),
            (None, Some(text)) => text_to_html(text),
            (None, None) => String::new(),
        };
        let html_content = render_reply_html(&body_html, &quoted);
        let text_content = reply_text.map(|t| render_reply_text(t, &quoted));

        let enqueue = EnqueueRequest {
            to_address: recipient.clone(),
            to_name: original.from_name.clone(),
            from_address: Some(original.to_address.clone()),
            from_name: client_name.clone(),
            reply_to_address: Some(original.to_address.clone()),
            subject: subject.clone(),
            html_content: Some(html_content),
            text_content,
            priority: request.priority,
            scheduled_at: None,
            max_retries: None,
            thread_id: Some(thread_id.to_string()),
        };
        let queue_entry_id = insert_entry(&mut tx, &enqueue, default_max_retries).await?;

        let sent_row = NewInboundEmail {
            thread_id: thread_id.to_string(),
            client_id: original.client_id.clone(),
            message_id: None,
            in_reply_to: original.message_id.clone(),
            from_address: original.to_address.clone(),
            from_name: client_name,
            to_address: recipient.clone(),
            subject,
            text_content: reply_text.map(str::to_string),
            html_content: Some(body_html),
            reply_to_address: None,
            status: InboxStatus::Sent,
            envelope: None,
        };
        let inbox_entry_id = store::insert_email(&mut tx, &sent_row).await?;

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        info!(
            thread_id = %thread_id,
            queue_entry_id = %queue_entry_id,
            to = %safe_email_log(&recipient),
            "Thread reply queued"
        );

        Ok(ThreadReplyResponse {
            thread_id: thread_id.to_string(),
            queue_entry_id,
            inbox_entry_id,
            to_address: recipient,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::models::CreateClientRequest;
    use crate::common::migrations::test_support::setup_test_db;
    use crate::inbound::normalizer::normalize;
    use crate::inbound::models::{OneOrMany, RawInboundPayload};
    use crate::inbound::store::InboxStore;
    use crate::outbound::OutboundQueue;

    async fn with_client(pool: &SqlitePool) -> String {
        ClientResolver::new(pool.clone())
            .create_client(CreateClientRequest {
                name: "Jane Doe".to_string(),
                contact_email: None,
                inbound_address: "jane@mail.test".to_string(),
                status: None,
            })
            .await
            .unwrap()
            .id
    }

    fn payload(to: &str) -> RawInboundPayload {
        RawInboundPayload {
            from: Some("Acme Talent <talent@acme.io>".to_string()),
            to: Some(OneOrMany::One(to.to_string())),
            subject: Some("Interview invitation".to_string()),
            text: Some("Are you free Tuesday?".to_string()),
            message_id: Some("<invite-1@acme.io>".to_string()),
            ..Default::default()
        }
    }

    fn receiver(pool: &SqlitePool, policy: UnmatchedPolicy) -> InboundReceiver {
        InboundReceiver::new(
            pool.clone(),
            InboundConfig {
                unmatched_policy: policy,
                webhook_secret: None,
            },
        )
    }

    #[tokio::test]
    async fn test_ingest_matches_client() {
        let pool = setup_test_db().await;
        let client_id = with_client(&pool).await;

        let result = receiver(&pool, UnmatchedPolicy::Reject)
            .ingest(normalize(payload("JANE@mail.test")).unwrap(), IngestSource::Webhook)
            .await
            .unwrap();

        assert_eq!(result.client_id, Some(client_id));
        assert!(!result.duplicate);
        assert!(result.thread_id.starts_with("TH_"));

        let stored: (String, String) =
            sqlx::query_as("SELECT to_address, status FROM inbound_emails WHERE id = ?")
                .bind(&result.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, ("jane@mail.test".to_string(), "unread".to_string()));
    }

    #[tokio::test]
    async fn test_unmatched_policy() {
        let pool = setup_test_db().await;
        with_client(&pool).await;

        let rejected = receiver(&pool, UnmatchedPolicy::Reject)
            .ingest(normalize(payload("nobody@mail.test")).unwrap(), IngestSource::Webhook)
            .await;
        assert!(matches!(rejected, Err(ApiError::NotFound(_))));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inbound_emails")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        let stored = receiver(&pool, UnmatchedPolicy::Store)
            .ingest(normalize(payload("nobody@mail.test")).unwrap(), IngestSource::ManualTest)
            .await
            .unwrap();
        assert_eq!(stored.client_id, None);
    }

    #[tokio::test]
    async fn test_duplicate_message_id_returns_existing() {
        let pool = setup_test_db().await;
        with_client(&pool).await;
        let receiver = receiver(&pool, UnmatchedPolicy::Reject);

        let first = receiver
            .ingest(normalize(payload("jane@mail.test")).unwrap(), IngestSource::Webhook)
            .await
            .unwrap();
        let second = receiver
            .ingest(normalize(payload("jane@mail.test")).unwrap(), IngestSource::Webhook)
            .await
            .unwrap();

        assert!(second.duplicate);
        assert_eq!(second.id, first.id);
        assert_eq!(second.thread_id, first.thread_id);
    }

    #[tokio::test]
    async fn test_same_message_for_two_clients_is_stored_for_each() {
        let pool = setup_test_db().await;
        let jane = with_client(&pool).await;
        let bob = ClientResolver::new(pool.clone())
            .create_client(CreateClientRequest {
                name: "Bob Roe".to_string(),
                contact_email: None,
                inbound_address: "bob@mail.test".to_string(),
                status: None,
            })
            .await
            .unwrap()
            .id;
        let receiver = receiver(&pool, UnmatchedPolicy::Reject);

        let delivery = |envelope_to: &str| {
            let mut raw = payload("jane@mail.test, bob@mail.test");
            raw.envelope = Some(serde_json::json!({ "to": [envelope_to] }));
            normalize(raw).unwrap()
        };

        let for_jane = receiver
            .ingest(delivery("jane@mail.test"), IngestSource::Webhook)
            .await
            .unwrap();
        let for_bob = receiver
            .ingest(delivery("bob@mail.test"), IngestSource::Webhook)
            .await
            .unwrap();

        assert_eq!(for_jane.client_id.as_deref(), Some(jane.as_str()));
        assert_eq!(for_bob.client_id.as_deref(), Some(bob.as_str()));
        assert!(!for_bob.duplicate);
        assert_ne!(for_bob.id, for_jane.id);
        assert_ne!(for_bob.thread_id, for_jane.thread_id);

        let bob_inbox = InboxStore::new(pool.clone())
            .list_for_client(&bob, None, None)
            .await
            .unwrap();
        assert_eq!(bob_inbox.len(), 1);

        let redelivered = receiver
            .ingest(delivery("bob@mail.test"), IngestSource::Webhook)
            .await
            .unwrap();
        assert!(redelivered.duplicate);
        assert_eq!(redelivered.id, for_bob.id);
    }

    #[tokio::test]
    async fn test_reply_joins_thread_but_manual_path_does_not() {
        let pool = setup_test_db().await;
        with_client(&pool).await;
        let receiver = receiver(&pool, UnmatchedPolicy::Reject);

        let first = receiver
            .ingest(normalize(payload("jane@mail.test")).unwrap(), IngestSource::Webhook)
            .await
            .unwrap();

        let mut follow_up = payload("jane@mail.test");
        follow_up.message_id = Some("<invite-2@acme.io>".to_string());
        follow_up.in_reply_to = Some("<INVITE-1@acme.io>".to_string());
        let joined = receiver
            .ingest(normalize(follow_up.clone()).unwrap(), IngestSource::Webhook)
            .await
            .unwrap();
        assert_eq!(joined.thread_id, first.thread_id);

        follow_up.message_id = Some("<invite-3@acme.io>".to_string());
        let manual = receiver
            .ingest(normalize(follow_up).unwrap(), IngestSource::ManualTest)
            .await
            .unwrap();
        assert_ne!(manual.thread_id, first.thread_id);
    }

    #[tokio::test]
    async fn test_reply_to_thread_enqueues_and_records_sent_row() {
        let pool = setup_test_db().await;
        with_client(&pool).await;
        let receiver = receiver(&pool, UnmatchedPolicy::Reject);

        let mut raw = payload("jane@mail.test");
        raw.reply_to = Some("scheduling@acme.io".to_string());
        let ingested = receiver
            .ingest(normalize(raw).unwrap(), IngestSource::Webhook)
            .await
            .unwrap();

        let reply = receiver
            .reply_to_thread(
                &ingested.thread_id,
                ThreadReplyRequest {
                    subject: None,
                    html: None,
                    text: Some("Tuesday works.".to_string()),
                    priority: Some(5),
                },
                3,
            )
            .await
            .unwrap();
        assert_eq!(reply.to_address, "scheduling@acme.io");

        let entry = OutboundQueue::new(pool.clone(), 3)
            .get(&reply.queue_entry_id)
            .await
            .unwrap();
        assert_eq!(entry.thread_id.as_deref(), Some(ingested.thread_id.as_str()));
        assert_eq!(entry.subject, "Re: Interview invitation");
        assert_eq!(entry.from_address.as_deref(), Some("jane@mail.test"));
        assert_eq!(entry.from_name.as_deref(), Some("Jane Doe"));
        assert_eq!(entry.priority, 5);
        assert!(entry.text_content.unwrap().contains("> Are you free Tuesday?"));

        let thread = InboxStore::new(pool)
            .fetch_thread_and_mark_read(&ingested.thread_id)
            .await
            .unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].status, "sent");
        assert_eq!(thread[1].id, reply.inbox_entry_id);
    }

    #[tokio::test]
    async fn test_reply_errors() {
        let pool = setup_test_db().await;
        let receiver = receiver(&pool, UnmatchedPolicy::Store);

        let missing = receiver
            .reply_to_thread(
                "TH_MISSING",
                ThreadReplyRequest {
                    subject: None,
                    html: Some("<p>Hi</p>".to_string()),
                    text: None,
                    priority: None,
                },
                3,
            )
            .await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));

        let empty = receiver
            .reply_to_thread(
                "TH_MISSING",
                ThreadReplyRequest {
                    subject: None,
                    html: Some("  ".to_string()),
                    text: None,
                    priority: None,
                },
                3,
            )
            .await;
        assert!(matches!(empty, Err(ApiError::ValidationError(_))));
    }
}
