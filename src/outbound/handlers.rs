use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::{
    EnqueueRequest, ProcessRequest, ProcessSummary, QueueEntry, QueueListQuery, QueueStatus,
};
use super::processor::QueueProcessor;
use super::queue::OutboundQueue;
use crate::auth::AuthedUser;
use crate::common::{ApiError, ApiResponse, AppState};

/// POST /api/admin/email-queue
pub async fn enqueue_email(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<ApiResponse<QueueEntry>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let entry = OutboundQueue::new(state.db, state.queue.default_max_retries)
        .enqueue(request)
        .await?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// GET /api/admin/email-queue?status=&limit=
pub async fn list_queue(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Query(query): Query<QueueListQuery>,
) -> Result<Json<ApiResponse<Vec<QueueEntry>>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let status = match query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(QueueStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unknown status '{}'. Use pending, in_flight, sent or failed",
                raw
            ))
        })?),
        None => None,
    };

    let entries = OutboundQueue::new(state.db, state.queue.default_max_retries)
        .list(status, query.limit)
        .await?;
    Ok(Json(ApiResponse::ok(entries)))
}

/// GET /api/admin/email-queue/:id
pub async fn get_queue_entry(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<QueueEntry>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let entry = OutboundQueue::new(state.db, state.queue.default_max_retries)
        .get(&id)
        .await?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// POST /api/admin/email-queue/process
pub async fn process_queue(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    body: Option<Json<ProcessRequest>>,
) -> Result<Json<ApiResponse<ProcessSummary>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let batch_size = body.and_then(|Json(req)| req.batch_size);
    if batch_size == Some(0) {
        return Err(ApiError::ValidationError(
            "batch_size: must be at least 1".to_string(),
        ));
    }

    let processor = QueueProcessor::new(state.db, state.email_sender, state.queue);
    let summary = processor.process_batch(batch_size).await?;
    Ok(Json(ApiResponse::ok(summary)))
}
