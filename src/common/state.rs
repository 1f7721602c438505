// Application state shared across all modules

use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

use crate::common::config::{InboundConfig, QueueConfig};
use crate::common::dev_mode::DevModeConfig;
use crate::outbound::sender::EmailSender;

/// Application state containing database pool, services, and configuration
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    pub admin_emails: HashSet<String>,
    pub dev_mode: DevModeConfig,
    pub inbound: InboundConfig,
    pub queue: QueueConfig,
    pub email_sender: Arc<dyn EmailSender>,
}
