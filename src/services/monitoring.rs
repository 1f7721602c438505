// src/services/monitoring.rs
//! Optional Sentry error tracking, configured from the environment

use std::env;
use tracing::info;

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub traces_sample_rate: f32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sentry_dsn: None,
            environment: "development".to_string(),
            traces_sample_rate: 0.0,
        }
    }
}

impl MonitoringConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            sentry_dsn: lookup("SENTRY_DSN").filter(|dsn| !dsn.trim().is_empty()),
            environment: lookup("ENVIRONMENT").unwrap_or(defaults.environment),
            traces_sample_rate: lookup("SENTRY_TRACES_SAMPLE_RATE")
                .and_then(|raw| raw.trim().parse::<f32>().ok())
                .map(|rate| rate.clamp(0.0, 1.0))
                .unwrap_or(defaults.traces_sample_rate),
        }
    }

    pub fn error_tracking_enabled(&self) -> bool {
        self.sentry_dsn.is_some()
    }
}

/// Initialize Sentry when a DSN is configured. Keep the guard alive for the
/// life of the process; dropping it flushes pending events.
pub fn init_sentry(config: &MonitoringConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_deref()?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            traces_sample_rate: config.traces_sample_rate,
            ..Default::default()
        },
    ));

    info!(environment = %config.environment, "Sentry initialized successfully");
    Some(guard)
}
