// Outbound queue persistence
//
// Every status change out of `in_flight` is conditioned on the claim token, so a
// processor that lost its claim (reclaimed as stale) cannot overwrite the entry.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::models::{EnqueueRequest, QueueEntry, QueueStatus};
use super::retry::{self, FailureTransition};
use crate::common::helpers::parse_sqlite_datetime;
use crate::common::{
    generate_queue_entry_id, normalize_address, safe_email_log, to_sqlite_datetime, ApiError,
    Validator,
};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validate and insert a pending entry on `conn`. Returns the new id.
pub async fn insert_entry(
    conn: &mut SqliteConnection,
    request: &EnqueueRequest,
    default_max_retries: i64,
) -> Result<String, ApiError> {
    request.validate(request).into_result()?;

    let scheduled_at = match non_blank(&request.scheduled_at) {
        Some(raw) => parse_sqlite_datetime(&raw).ok_or_else(|| {
            ApiError::ValidationError(format!("scheduled_at: '{}' is not a valid timestamp", raw))
        })?,
        None => Utc::now(),
    };

    let id = generate_queue_entry_id();
    let now = to_sqlite_datetime(Utc::now());
    let to_address = normalize_address(&request.to_address);

    sqlx::query(
        r#"
        INSERT INTO email_queue (
            id, to_address, to_name, from_address, from_name, reply_to_address,
            subject, html_content, text_content, priority, scheduled_at,
            status, retry_count, max_retries, thread_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&to_address)
    .bind(non_blank(&request.to_name))
    .bind(non_blank(&request.from_address).map(|a| normalize_address(&a)))
    .bind(non_blank(&request.from_name))
    .bind(non_blank(&request.reply_to_address).map(|a| normalize_address(&a)))
    .bind(request.subject.trim())
    .bind(non_blank(&request.html_content))
    .bind(non_blank(&request.text_content))
    .bind(request.priority.unwrap_or(0))
    .bind(to_sqlite_datetime(scheduled_at))
    .bind(request.max_retries.unwrap_or(default_max_retries))
    .bind(non_blank(&request.thread_id))
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await
    .map_err(ApiError::DatabaseError)?;

    info!(
        entry_id = %id,
        to = %safe_email_log(&to_address),
        priority = request.priority.unwrap_or(0),
        "Email enqueued"
    );

    Ok(id)
}

#[derive(Clone)]
pub struct OutboundQueue {
    db: SqlitePool,
    default_max_retries: i64,
}

impl OutboundQueue {
    pub fn new(db: SqlitePool, default_max_retries: i64) -> Self {
        Self {
            db,
            default_max_retries,
        }
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueEntry, ApiError> {
        let mut conn = self.db.acquire().await.map_err(ApiError::DatabaseError)?;
        let id = insert_entry(&mut conn, &request, self.default_max_retries).await?;
        drop(conn);
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> Result<QueueEntry, ApiError> {
        sqlx::query_as::<_, QueueEntry>("SELECT * FROM email_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?
            .ok_or_else(|| ApiError::NotFound("Queue entry not found".to_string()))
    }

    /// Newest first, optionally filtered by status
    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<QueueEntry>, ApiError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

        let entries = match status {
            Some(status) => {
                sqlx::query_as::<_, QueueEntry>(
                    "SELECT * FROM email_queue WHERE status = ? ORDER BY datetime(created_at) DESC, rowid DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.db)
                .await
            }
            None => {
                sqlx::query_as::<_, QueueEntry>(
                    "SELECT * FROM email_queue ORDER BY datetime(created_at) DESC, rowid DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.db)
                .await
            }
        };

        entries.map_err(ApiError::DatabaseError)
    }

    /// Pending entries whose schedule time has passed, in processing order
    pub async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueueEntry>, ApiError> {
        sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT * FROM email_queue
            WHERE status = 'pending' AND datetime(scheduled_at) <= datetime(?)
            ORDER BY priority DESC, datetime(scheduled_at) ASC, datetime(created_at) ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(to_sqlite_datetime(now))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// `pending -> in_flight`. False when someone else got there first.
    pub async fn claim(
        &self,
        id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let stamp = to_sqlite_datetime(now);
        let claimed = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'in_flight', claim_token = ?, claimed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(claim_token)
        .bind(&stamp)
        .bind(&stamp)
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?
        .rows_affected();

        Ok(claimed == 1)
    }

    /// Return abandoned claims to `pending`. Does not count as an attempt.
    pub async fn reclaim_stale(
        &self,
        now: DateTime<Utc>,
        claim_timeout: Duration,
    ) -> Result<u64, ApiError> {
        let timeout = chrono::Duration::from_std(claim_timeout)
            .map_err(|e| ApiError::InternalServer(format!("invalid claim timeout: {}", e)))?;
        let cutoff = to_sqlite_datetime(now - timeout);

        let reclaimed = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'pending', claim_token = NULL, claimed_at = NULL, updated_at = ?
            WHERE status = 'in_flight' AND datetime(claimed_at) <= datetime(?)
            "#,
        )
        .bind(to_sqlite_datetime(now))
        .bind(&cutoff)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?
        .rows_affected();

        if reclaimed > 0 {
            warn!(count = reclaimed, "Reclaimed stale in-flight queue entries");
        }

        Ok(reclaimed)
    }

    /// `in_flight -> sent`. False when the claim was lost.
    pub async fn settle_success(
        &self,
        id: &str,
        claim_token: &str,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let stamp = to_sqlite_datetime(now);
        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        let settled = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'sent', provider_message_id = ?, sent_at = ?, error_message = NULL,
                claim_token = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND claim_token = ? AND status = 'in_flight'
            "#,
        )
        .bind(provider_message_id)
        .bind(&stamp)
        .bind(&stamp)
        .bind(id)
        .bind(claim_token)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?
        .rows_affected();

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        debug!(entry_id = %id, settled = settled == 1, "Queue entry settled as sent");
        Ok(settled == 1)
    }

    /// Record a failed attempt. Reads the retry budget and writes the new
    /// status in one transaction. `None` when the claim was lost.
    pub async fn settle_failure(
        &self,
        id: &str,
        claim_token: &str,
        error_message: &str,
        now: DateTime<Utc>,
        retry_base: Duration,
        retry_max: Duration,
    ) -> Result<Option<FailureTransition>, ApiError> {
        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        let budget = sqlx::query_as::<_, (i64, i64)>(
            "SELECT retry_count, max_retries FROM email_queue WHERE id = ? AND claim_token = ? AND status = 'in_flight'",
        )
        .bind(id)
        .bind(claim_token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        let Some((retry_count, max_retries)) = budget else {
            tx.rollback().await.map_err(ApiError::DatabaseError)?;
            return Ok(None);
        };

        let transition = retry::on_failure(retry_count, max_retries, retry_base, retry_max);
        let stamp = to_sqlite_datetime(now);

        let scheduled_at = match transition.retry_in {
            Some(delay) => {
                let delay = chrono::Duration::from_std(delay).map_err(|e| {
                    ApiError::InternalServer(format!("invalid retry delay: {}", e))
                })?;
                Some(to_sqlite_datetime(now + delay))
            }
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE email_queue
            SET status = ?, retry_count = ?, error_message = ?,
                scheduled_at = COALESCE(?, scheduled_at),
                claim_token = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND claim_token = ?
            "#,
        )
        .bind(transition.status.as_str())
        .bind(transition.retry_count)
        .bind(error_message)
        .bind(&scheduled_at)
        .bind(&stamp)
        .bind(id)
        .bind(claim_token)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(Some(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::test_support::setup_test_db;

    fn request(to: &str, priority: i64) -> EnqueueRequest {
        EnqueueRequest {
            to_address: to.to_string(),
            subject: "Hello".to_string(),
            text_content: Some("Body".to_string()),
            priority: Some(priority),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_enqueue_sets_defaults() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);

        let entry = queue.enqueue(request("A@X.com", 5)).await.unwrap();
        assert!(entry.id.starts_with("Q_"));
        assert_eq!(entry.to_address, "a@x.com");
        assert_eq!(entry.status, "pending");
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.max_retries, 3);
        assert_eq!(entry.priority, 5);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool.clone(), 3);

        let mut bad_time = request("a@x.com", 0);
        bad_time.scheduled_at = Some("next tuesday".to_string());
        assert!(matches!(
            queue.enqueue(bad_time).await,
            Err(ApiError::ValidationError(_))
        ));

        let no_body = EnqueueRequest {
            to_address: "a@x.com".to_string(),
            subject: "Hi".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            queue.enqueue(no_body).await,
            Err(ApiError::ValidationError(_))
        ));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);
        assert!(matches!(
            queue.get("Q_MISSING").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_due_entries_order_and_schedule() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);

        let low = queue.enqueue(request("b@x.com", 0)).await.unwrap();
        let high = queue.enqueue(request("a@x.com", 10)).await.unwrap();
        let mut later = request("c@x.com", 100);
        later.scheduled_at = Some("2999-01-01 00:00:00".to_string());
        queue.enqueue(later).await.unwrap();

        let due = queue.due_entries(Utc::now(), 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![high.id.as_str(), low.id.as_str()]);

        let one = queue.due_entries(Utc::now(), 1).await.unwrap();
        assert_eq!(one[0].to_address, "a@x.com");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);
        let entry = queue.enqueue(request("a@x.com", 0)).await.unwrap();

        assert!(queue.claim(&entry.id, "token-1", Utc::now()).await.unwrap());
        assert!(!queue.claim(&entry.id, "token-2", Utc::now()).await.unwrap());

        let stored = queue.get(&entry.id).await.unwrap();
        assert_eq!(stored.status, "in_flight");
        assert_eq!(stored.claim_token.as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_settle_requires_matching_claim() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);
        let entry = queue.enqueue(request("a@x.com", 0)).await.unwrap();
        queue.claim(&entry.id, "token-1", Utc::now()).await.unwrap();

        assert!(!queue
            .settle_success(&entry.id, "wrong", "msg-1", Utc::now())
            .await
            .unwrap());
        assert!(queue
            .settle_failure(&entry.id, "wrong", "boom", Utc::now(), Duration::ZERO, Duration::ZERO)
            .await
            .unwrap()
            .is_none());

        assert!(queue
            .settle_success(&entry.id, "token-1", "msg-1", Utc::now())
            .await
            .unwrap());
        let stored = queue.get(&entry.id).await.unwrap();
        assert_eq!(stored.status, "sent");
        assert_eq!(stored.provider_message_id.as_deref(), Some("msg-1"));
        assert!(stored.sent_at.is_some());
        assert!(stored.claim_token.is_none());
    }

    #[tokio::test]
    async fn test_settle_failure_reschedules_with_backoff() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);
        let entry = queue.enqueue(request("a@x.com", 0)).await.unwrap();
        let now = Utc::now();
        queue.claim(&entry.id, "t", now).await.unwrap();

        let transition = queue
            .settle_failure(
                &entry.id,
                "t",
                "550 mailbox unavailable",
                now,
                Duration::from_secs(60),
                Duration::from_secs(3600),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transition.status, QueueStatus::Pending);

        let stored = queue.get(&entry.id).await.unwrap();
        assert_eq!(stored.status, "pending");
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("550 mailbox unavailable"));
        let scheduled = parse_sqlite_datetime(&stored.scheduled_at).unwrap();
        assert!(scheduled > now + chrono::Duration::seconds(59));

        assert!(queue.due_entries(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_stale_claims() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);
        let stale = queue.enqueue(request("a@x.com", 0)).await.unwrap();
        let fresh = queue.enqueue(request("b@x.com", 0)).await.unwrap();

        let now = Utc::now();
        queue
            .claim(&stale.id, "old", now - chrono::Duration::seconds(600))
            .await
            .unwrap();
        queue.claim(&fresh.id, "new", now).await.unwrap();

        let reclaimed = queue
            .reclaim_stale(now, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(queue.get(&stale.id).await.unwrap().status, "pending");
        assert_eq!(queue.get(&fresh.id).await.unwrap().status, "in_flight");
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let pool = setup_test_db().await;
        let queue = OutboundQueue::new(pool, 3);
        let a = queue.enqueue(request("a@x.com", 0)).await.unwrap();
        queue.enqueue(request("b@x.com", 0)).await.unwrap();
        queue.claim(&a.id, "t", Utc::now()).await.unwrap();

        assert_eq!(queue.list(None, None).await.unwrap().len(), 2);
        let in_flight = queue
            .list(Some(QueueStatus::InFlight), None)
            .await
            .unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].id, a.id);
    }
}
