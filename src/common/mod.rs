// Common module - shared types and utilities across all modules

pub mod config;
pub mod dev_mode;
pub mod error;
pub mod helpers;
pub mod id_generator;
pub mod migrations;
pub mod response;
pub mod state;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::ApiError;
pub use helpers::{normalize_address, safe_email_log, secrets_match, to_sqlite_datetime};
pub use id_generator::*;
pub use response::ApiResponse;
pub use state::AppState;
pub use validation::{ValidationResult, Validator};
