//! Queue processor
//!
//! One pass: reclaim stale claims, select due entries, then for each entry
//! claim it, attempt delivery under a timeout and settle the result. A failing
//! entry is recorded and the pass moves on.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::models::{ProcessSummary, QueueEntry, QueueStatus};
use super::queue::OutboundQueue;
use super::sender::{EmailSender, OutgoingEmail, SendError};
use crate::common::config::QueueConfig;
use crate::common::{safe_email_log, ApiError};

pub struct QueueProcessor {
    queue: OutboundQueue,
    sender: Arc<dyn EmailSender>,
    config: QueueConfig,
}

impl QueueProcessor {
    pub fn new(db: SqlitePool, sender: Arc<dyn EmailSender>, config: QueueConfig) -> Self {
        Self {
            queue: OutboundQueue::new(db, config.default_max_retries),
            sender,
            config,
        }
    }

    /// Run one pass. `batch_size` may lower the configured size, never raise it.
    pub async fn process_batch(&self, batch_size: Option<u32>) -> Result<ProcessSummary, ApiError> {
        self.process_batch_at(Utc::now(), batch_size).await
    }

    /// `now` selects due entries and the stale-claim cutoff. Claims are
    /// stamped with the time they are taken.
    pub async fn process_batch_at(
        &self,
        now: DateTime<Utc>,
        batch_size: Option<u32>,
    ) -> Result<ProcessSummary, ApiError> {
        let limit = batch_size
            .unwrap_or(self.config.batch_size)
            .clamp(1, self.config.batch_size.max(1));

        let mut summary = ProcessSummary {
            reclaimed: self
                .queue
                .reclaim_stale(now, self.config.claim_timeout)
                .await? as u32,
            ..Default::default()
        };

        let due = self.queue.due_entries(now, limit).await?;
        if due.is_empty() {
            return Ok(summary);
        }

        info!(count = due.len(), batch_size = limit, "Processing email queue batch");

        for entry in due {
            let claim_token = Uuid::new_v4().to_string();
            // Stamped with the wall clock so a long pass never hands out claims
            // that already look stale to a concurrent reclaim
            match self.queue.claim(&entry.id, &claim_token, Utc::now()).await {
                Ok(true) => {}
                Ok(false) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(entry_id = %entry.id, error = %e, "Failed to claim queue entry");
                    summary.skipped += 1;
                    continue;
                }
            }

            summary.processed += 1;
            match self.attempt(&entry, &claim_token).await {
                Ok(Some(QueueStatus::Sent)) => summary.sent += 1,
                Ok(Some(QueueStatus::Pending)) => summary.retried += 1,
                Ok(Some(QueueStatus::Failed)) => summary.failed += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    // Entry stays in_flight and is reclaimed once the claim goes stale
                    error!(entry_id = %entry.id, error = %e, "Failed to settle queue entry");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            skipped = summary.skipped,
            "Email queue batch finished"
        );

        Ok(summary)
    }

    /// Deliver one claimed entry and settle it. `None` when the claim was lost.
    async fn attempt(
        &self,
        entry: &QueueEntry,
        claim_token: &str,
    ) -> Result<Option<QueueStatus>, ApiError> {
        let email = OutgoingEmail::from(entry);
        let timeout = self.config.send_timeout;

        let outcome = match tokio::time::timeout(timeout, self.sender.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(timeout.as_secs())),
        };

        // Settled with the current time so backoff counts from the attempt
        let settled_at = Utc::now();

        match outcome {
            Ok(provider_message_id) => {
                let settled = self
                    .queue
                    .settle_success(&entry.id, claim_token, &provider_message_id, settled_at)
                    .await?;
                if !settled {
                    warn!(entry_id = %entry.id, "Claim lost before success was recorded");
                    return Ok(None);
                }
                info!(
                    entry_id = %entry.id,
                    to = %safe_email_log(&entry.to_address),
                    provider_message_id = %provider_message_id,
                    "Queued email sent"
                );
                Ok(Some(QueueStatus::Sent))
            }
            Err(send_error) => {
                let message = send_error.to_string();
                let transition = self
                    .queue
                    .settle_failure(
                        &entry.id,
                        claim_token,
                        &message,
                        settled_at,
                        self.config.retry_base_delay,
                        self.config.retry_max_delay,
                    )
                    .await?;

                match transition {
                    Some(t) => {
                        warn!(
                            entry_id = %entry.id,
                            error = %message,
                            retry_count = t.retry_count,
                            status = t.status.as_str(),
                            "Queued email send failed"
                        );
                        Ok(Some(t.status))
                    }
                    None => {
                        warn!(entry_id = %entry.id, "Claim lost before failure was recorded");
                        Ok(None)
                    }
                }
            }
        }
    }
}
