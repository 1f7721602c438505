use super::handlers;
use axum::{
    routing::{get, post},
    Router,
};

pub fn outbound_routes() -> Router {
    Router::new()
        .route(
            "/api/admin/email-queue",
            get(handlers::list_queue).post(handlers::enqueue_email),
        )
        // Static segment wins over the :id capture
        .route(
            "/api/admin/email-queue/process",
            post(handlers::process_queue),
        )
        .route(
            "/api/admin/email-queue/:id",
            get(handlers::get_queue_entry),
        )
}
