use super::handlers;
use axum::{
    routing::{get, post},
    Router,
};

pub fn inbound_routes() -> Router {
    Router::new()
        // Provider webhook (JSON or multipart)
        .route("/api/email/inbound", post(handlers::receive_inbound))
        .route(
            "/api/admin/email/inbound/test",
            post(handlers::receive_test_inbound),
        )
        .route(
            "/api/threads/:thread_id",
            get(handlers::get_thread).post(handlers::reply_thread),
        )
        .route(
            "/api/clients/:client_id/inbox",
            get(handlers::client_inbox),
        )
}
