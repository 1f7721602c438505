use super::handlers;
use axum::{routing::get, Router};

pub fn clients_routes() -> Router {
    Router::new().route(
        "/api/admin/clients",
        get(handlers::list_clients).post(handlers::create_client),
    )
}
