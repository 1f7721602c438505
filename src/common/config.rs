// Pipeline configuration loaded from the environment

use std::env;
use std::time::Duration;
use tracing::warn;

/// What to do with inbound mail whose destination matches no active client.
/// One policy governs every inbound entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedPolicy {
    /// Respond 404 and store nothing
    Reject,
    /// Store the row with a null client reference
    Store,
}

impl UnmatchedPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "reject" => Some(UnmatchedPolicy::Reject),
            "store" => Some(UnmatchedPolicy::Store),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundConfig {
    pub unmatched_policy: UnmatchedPolicy,
    /// Shared secret expected in `x-webhook-secret`; unset disables the check
    pub webhook_secret: Option<String>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            unmatched_policy: UnmatchedPolicy::Reject,
            webhook_secret: None,
        }
    }
}

impl InboundConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("INBOUND_UNMATCHED_POLICY") {
            match UnmatchedPolicy::parse(&raw) {
                Some(policy) => config.unmatched_policy = policy,
                None => warn!(value = %raw, "Unknown INBOUND_UNMATCHED_POLICY, using reject"),
            }
        }

        config.webhook_secret = env::var("INBOUND_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        config
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub batch_size: u32,
    pub send_timeout: Duration,
    pub default_max_retries: i64,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// In-flight claims older than this are considered abandoned
    pub claim_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            send_timeout: Duration::from_secs(30),
            default_max_retries: 3,
            retry_base_delay: Duration::from_secs(60),
            retry_max_delay: Duration::from_secs(3600),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

/// Slack between the send timeout and the point a claim counts as abandoned
const CLAIM_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

fn parse_u64(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring non-numeric setting");
            None
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| parse_u64(key, lookup(key));
        let mut config = Self::default();

        if let Some(val) = read("EMAIL_QUEUE_BATCH_SIZE") {
            config.batch_size = val.clamp(1, 500) as u32;
        }
        if let Some(val) = read("EMAIL_SEND_TIMEOUT_SECS") {
            config.send_timeout = Duration::from_secs(val.max(1));
        }
        if let Some(val) = read("EMAIL_DEFAULT_MAX_RETRIES") {
            config.default_max_retries = val.max(1) as i64;
        }
        if let Some(val) = read("EMAIL_RETRY_BASE_SECS") {
            config.retry_base_delay = Duration::from_secs(val);
        }
        if let Some(val) = read("EMAIL_RETRY_MAX_SECS") {
            config.retry_max_delay = Duration::from_secs(val);
        }
        if let Some(val) = read("EMAIL_CLAIM_TIMEOUT_SECS") {
            config.claim_timeout = Duration::from_secs(val.max(1));
        }

        // A claim must outlive the longest send it covers
        let min_claim = config.send_timeout + CLAIM_TIMEOUT_MARGIN;
        if config.claim_timeout < min_claim {
            warn!(
                claim_timeout_secs = config.claim_timeout.as_secs(),
                send_timeout_secs = config.send_timeout.as_secs(),
                raised_to_secs = min_claim.as_secs(),
                "EMAIL_CLAIM_TIMEOUT_SECS too short for the send timeout, raising it"
            );
            config.claim_timeout = min_claim;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_policy_parse() {
        assert_eq!(UnmatchedPolicy::parse("reject"), Some(UnmatchedPolicy::Reject));
        assert_eq!(UnmatchedPolicy::parse(" STORE "), Some(UnmatchedPolicy::Store));
        assert_eq!(UnmatchedPolicy::parse("drop"), None);
    }

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert!(config.retry_base_delay <= config.retry_max_delay);
    }

    #[test]
    fn test_inbound_config_defaults() {
        let config = InboundConfig::default();
        assert_eq!(config.unmatched_policy, UnmatchedPolicy::Reject);
        assert!(config.webhook_secret.is_none());
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_queue_config_from_lookup() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("EMAIL_QUEUE_BATCH_SIZE", "25"),
            ("EMAIL_SEND_TIMEOUT_SECS", "10"),
            ("EMAIL_CLAIM_TIMEOUT_SECS", "120"),
            ("EMAIL_DEFAULT_MAX_RETRIES", "five"),
        ]));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert_eq!(config.claim_timeout, Duration::from_secs(120));
        assert_eq!(config.default_max_retries, 3);
    }

    #[test]
    fn test_claim_timeout_raised_above_send_timeout() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("EMAIL_SEND_TIMEOUT_SECS", "60"),
            ("EMAIL_CLAIM_TIMEOUT_SECS", "45"),
        ]));
        assert_eq!(config.claim_timeout, Duration::from_secs(90));
        assert!(config.claim_timeout > config.send_timeout);

        let defaults = QueueConfig::from_lookup(lookup(&[]));
        assert_eq!(defaults.claim_timeout, Duration::from_secs(300));
    }
}
