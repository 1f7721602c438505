// src/common/dev_mode.rs
//! Development mode configuration and command-line switches
//! Dev mode bypasses bearer authentication for local testing

use std::env;

#[derive(Debug, Clone)]
pub struct DevModeConfig {
    pub enabled: bool,
    pub user_email: String,
    pub user_is_admin: bool,
}

/// Fixed id so every dev request maps to the same operator
pub const DEV_USER_ID: &str = "U_DEV000";

impl DevModeConfig {
    pub fn from_env() -> Self {
        let enabled = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        let user_email =
            env::var("DEV_USER_EMAIL").unwrap_or_else(|_| "ops@interviewsfirst.test".to_string());

        let user_is_admin = env::var("DEV_USER_IS_ADMIN")
            .unwrap_or_else(|_| "true".to_string())
            .to_lowercase()
            == "true";

        Self {
            enabled,
            user_email,
            user_is_admin,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            user_email: String::new(),
            user_is_admin: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Print dev mode status on startup
pub fn print_dev_mode_status(config: &DevModeConfig) {
    if config.enabled {
        println!("⚠️  DEV MODE ENABLED: bearer authentication bypassed");
        println!("   Dev user: {}", config.user_email);
        println!(
            "   Admin: {}",
            if config.user_is_admin { "Yes" } else { "No" }
        );
        println!();
    } else {
        println!("🔒 Production mode - Authentication required");
    }
}

/// What the binary was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Serve the HTTP API
    Serve,
    /// Drain one batch of the outbound queue and exit (for cron-style schedulers)
    ProcessQueueOnce,
}

/// Recognized flags: `--dev`, `--prod`, `--process-queue`. Anything else is ignored.
pub fn parse_cli_args<I>(args: I) -> (Option<bool>, RunMode)
where
    I: IntoIterator<Item = String>,
{
    let mut dev_override = None;
    let mut mode = RunMode::Serve;

    for arg in args {
        match arg.as_str() {
            "--dev" | "--dev-mode" => dev_override = Some(true),
            "--no-dev" | "--prod" | "--production" => dev_override = Some(false),
            "--process-queue" => mode = RunMode::ProcessQueueOnce,
            _ => {}
        }
    }

    (dev_override, mode)
}

/// Override dev mode from CLI args
pub fn apply_cli_override(mut config: DevModeConfig, dev_override: Option<bool>) -> DevModeConfig {
    if let Some(cli_dev_mode) = dev_override {
        println!("🔧 CLI override: DEV_MODE = {}", cli_dev_mode);
        config.enabled = cli_dev_mode;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_cli_args_defaults() {
        let (dev, mode) = parse_cli_args(args(&["mail_api"]));
        assert_eq!(dev, None);
        assert_eq!(mode, RunMode::Serve);
    }

    #[test]
    fn test_parse_cli_args_flags() {
        let (dev, mode) = parse_cli_args(args(&["mail_api", "--prod", "--process-queue"]));
        assert_eq!(dev, Some(false));
        assert_eq!(mode, RunMode::ProcessQueueOnce);

        let (dev, _) = parse_cli_args(args(&["mail_api", "--dev"]));
        assert_eq!(dev, Some(true));
    }

    #[test]
    fn test_apply_cli_override() {
        let config = apply_cli_override(DevModeConfig::disabled(), Some(true));
        assert!(config.is_enabled());

        let config = apply_cli_override(DevModeConfig::disabled(), None);
        assert!(!config.is_enabled());
    }
}
