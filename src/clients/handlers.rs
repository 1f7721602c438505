use axum::{Extension, Json};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::{Client, CreateClientRequest};
use super::resolver::ClientResolver;
use crate::auth::AuthedUser;
use crate::common::{ApiError, ApiResponse, AppState};

/// POST /api/admin/clients
pub async fn create_client(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Json(request): Json<CreateClientRequest>,
) -> Result<Json<ApiResponse<Client>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let client = ClientResolver::new(state.db).create_client(request).await?;
    Ok(Json(ApiResponse::ok(client)))
}

/// GET /api/admin/clients
pub async fn list_clients(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<ApiResponse<Vec<Client>>>, ApiError> {
    authed.require_admin()?;
    let state = state_lock.read().await.clone();

    let clients = ClientResolver::new(state.db).list_clients().await?;
    Ok(Json(ApiResponse::ok(clients)))
}
