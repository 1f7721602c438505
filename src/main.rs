// src/main.rs
use axum::{extract::Extension, middleware, routing::get, Json, Router};
use dotenv::dotenv;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod auth;
mod clients;
mod common;
mod inbound;
mod logging_middleware;
mod outbound;
mod services;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use common::config::{InboundConfig, QueueConfig};
use common::dev_mode::{
    apply_cli_override, parse_cli_args, print_dev_mode_status, DevModeConfig, RunMode,
};
use common::AppState;
use outbound::sender::{EmailSender, LogSender, SesSender};
use outbound::QueueProcessor;
use services::monitoring::{init_sentry, MonitoringConfig};
use services::{AWSService, SesConfig};

// ============================================================================
// ROUTER COMPOSITION
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": { "status": "ok" } }))
}

fn cors_layer() -> CorsLayer {
    let cors_origins = env::var("CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    let origins: Vec<axum::http::HeaderValue> = cors_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

pub fn build_router(shared: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Inbound webhook, threads and client inboxes
        .merge(inbound::inbound_routes())
        // Outbound queue administration
        .merge(outbound::outbound_routes())
        // Client registry
        .merge(clients::clients_routes())
        .layer(middleware::from_fn(logging_middleware::log_request_response))
        .layer(Extension(shared))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let monitoring = MonitoringConfig::from_env();
    let _sentry_guard = init_sentry(&monitoring);

    let sentry_layer = monitoring
        .error_tracking_enabled()
        .then(|| sentry_tracing::layer());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_layer)
        .init();

    let (dev_override, run_mode) = parse_cli_args(env::args().skip(1));

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://mail_api.db".to_string());
    let jwt_secret =
        env::var("JWT_SECRET").unwrap_or_else(|_| "replace_with_strong_secret".to_string());

    let admin_emails: HashSet<String> = env::var("ADMIN_EMAILS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    info!(count = admin_emails.len(), "Loaded admin emails");

    let inbound_config = InboundConfig::from_env();
    let queue_config = QueueConfig::from_env();
    info!(
        unmatched_policy = ?inbound_config.unmatched_policy,
        webhook_secret = inbound_config.webhook_secret.is_some(),
        batch_size = queue_config.batch_size,
        send_timeout_secs = queue_config.send_timeout.as_secs(),
        "Pipeline configuration loaded"
    );

    // ========================================================================
    // DEV MODE CONFIGURATION
    // ========================================================================

    let dev_mode = apply_cli_override(DevModeConfig::from_env(), dev_override);
    print_dev_mode_status(&dev_mode);

    // ========================================================================
    // DATABASE SETUP
    // ========================================================================

    if let Some(path_part) = database_url.strip_prefix("sqlite://") {
        let path_without_params = path_part.split('?').next().unwrap_or("");
        if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
            let db_path = PathBuf::from(path_without_params);
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let connect_options = SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await?;

    common::migrations::run_migrations(&pool).await?;

    // ========================================================================
    // EMAIL TRANSPORT
    // ========================================================================

    let transport = env::var("EMAIL_TRANSPORT").unwrap_or_else(|_| "ses".to_string());
    let email_sender: Arc<dyn EmailSender> = match transport.trim().to_lowercase().as_str() {
        "log" => {
            warn!("EMAIL_TRANSPORT=log: queued emails are logged, not delivered");
            Arc::new(LogSender)
        }
        other => {
            if other != "ses" {
                warn!(transport = %other, "Unknown EMAIL_TRANSPORT, using ses");
            }
            let ses_config = SesConfig::from_env()?;
            let aws_service = Arc::new(AWSService::new(ses_config).await);
            Arc::new(SesSender::new(aws_service))
        }
    };

    // ========================================================================
    // ONE-SHOT QUEUE PASS
    // ========================================================================

    if run_mode == RunMode::ProcessQueueOnce {
        let processor = QueueProcessor::new(pool, email_sender, queue_config);
        let summary = processor.process_batch(None).await?;
        info!(
            processed = summary.processed,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            skipped = summary.skipped,
            reclaimed = summary.reclaimed,
            "Queue pass complete"
        );
        return Ok(());
    }

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let app_state = AppState {
        db: pool,
        jwt_secret,
        admin_emails,
        dev_mode,
        inbound: inbound_config,
        queue: queue_config,
        email_sender,
    };

    let shared = Arc::new(RwLock::new(app_state));
    let app = build_router(shared);

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
