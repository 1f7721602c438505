use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request},
    http::header::CONTENT_TYPE,
    Extension, Json,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::models::{
    InboundEmailView, InboxQuery, IngestResult, RawInboundPayload, ThreadReplyRequest,
    ThreadReplyResponse, ThreadView,
};
use super::normalizer::{normalize, payload_from_form_fields};
use super::receiver::{InboundReceiver, IngestSource};
use super::store::InboxStore;
use crate::auth::AuthedUser;
use crate::clients::ClientResolver;
use crate::common::{secrets_match, ApiError, ApiResponse, AppState};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// JSON body or multipart form, folded into one raw payload
async fn read_payload(request: Request) -> Result<RawInboundPayload, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?;

        let mut fields = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart field: {}", e)))?
        {
            // Attachments are not stored
            if field.file_name().is_some() {
                continue;
            }
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read field '{}': {}", name, e)))?;
            fields.push((name, value));
        }

        debug!(field_count = fields.len(), "Parsed multipart inbound payload");
        Ok(payload_from_form_fields(fields))
    } else {
        let Json(payload) = Json::<RawInboundPayload>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        Ok(payload)
    }
}

/// POST /api/email/inbound - provider webhook
pub async fn receive_inbound(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    request: Request,
) -> Result<Json<ApiResponse<IngestResult>>, ApiError> {
    let state = state_lock.read().await.clone();

    if let Some(expected) = &state.inbound.webhook_secret {
        let provided = request
            .headers()
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if !provided.is_some_and(|value| secrets_match(value, expected)) {
            warn!("Inbound webhook rejected: bad or missing secret");
            return Err(ApiError::Unauthorized("invalid webhook secret".into()));
        }
    }

    let payload = read_payload(request).await?;
    let inbound = normalize(payload)?;

    let result = InboundReceiver::new(state.db, state.inbound)
        .ingest(inbound, IngestSource::Webhook)
        .await?;
    Ok(Json(ApiResponse::ok(result)))
}

/// POST /api/admin/email/inbound/test - manual inbound, always a new thread
pub async fn receive_test_inbound(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    request: Request,
) -> Result<Json<ApiResponse<IngestResult>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let payload = read_payload(request).await?;
    let inbound = normalize(payload)?;

    let result = InboundReceiver::new(state.db, state.inbound)
        .ingest(inbound, IngestSource::ManualTest)
        .await?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/threads/:thread_id - all messages, oldest first; marks them read
pub async fn get_thread(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    _authed: AuthedUser,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<ThreadView>>, ApiError> {
    let state = state_lock.read().await.clone();

    let emails = InboxStore::new(state.db)
        .fetch_thread_and_mark_read(&thread_id)
        .await?;

    Ok(Json(ApiResponse::ok(ThreadView {
        thread_id,
        emails: emails.into_iter().map(InboundEmailView::from).collect(),
    })))
}

/// POST /api/threads/:thread_id - reply to the thread
pub async fn reply_thread(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    _authed: AuthedUser,
    Path(thread_id): Path<String>,
    Json(request): Json<ThreadReplyRequest>,
) -> Result<Json<ApiResponse<ThreadReplyResponse>>, ApiError> {
    let state = state_lock.read().await.clone();

    let response = InboundReceiver::new(state.db, state.inbound)
        .reply_to_thread(&thread_id, request, state.queue.default_max_retries)
        .await?;
    Ok(Json(ApiResponse::ok(response)))
}

/// GET /api/clients/:client_id/inbox?limit=&offset=
pub async fn client_inbox(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    _authed: AuthedUser,
    Path(client_id): Path<String>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<ApiResponse<Vec<InboundEmailView>>>, ApiError> {
    let state = state_lock.read().await.clone();

    ClientResolver::new(state.db.clone())
        .get_client(&client_id)
        .await?;

    let emails = InboxStore::new(state.db)
        .list_for_client(&client_id, query.limit, query.offset)
        .await?;
    Ok(Json(ApiResponse::ok(
        emails.into_iter().map(InboundEmailView::from).collect(),
    )))
}
