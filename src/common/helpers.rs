// Helper functions for safe logging and timestamp handling

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Format used for every timestamp column, matching SQLite's `datetime('now')`
pub const SQLITE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Masks email addresses for safe logging
/// Prevents sensitive data exposure while preserving debugging utility
///
/// # Example
/// ```ignore
/// let masked = safe_email_log("user@example.com");
/// // Returns: "u***@example.com"
/// ```
pub fn safe_email_log(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.contains('@') => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***@***.***".to_string(),
    }
}

/// Renders a UTC instant the way the database stores it
pub fn to_sqlite_datetime(at: DateTime<Utc>) -> String {
    at.format(SQLITE_DATETIME_FORMAT).to_string()
}

/// Parses a stored timestamp; accepts the SQLite form and RFC 3339
pub fn parse_sqlite_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, SQLITE_DATETIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Trims and lowercases an address for comparisons and storage keys
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Compares a presented shared secret against the configured one without
/// leaking where they differ. Both sides are reduced to HMAC tags of equal
/// length, then checked with the MAC's constant-time verify.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    const KEY: &[u8] = b"interviewsfirst-shared-secret";

    let Ok(mut expected_mac) = Hmac::<Sha256>::new_from_slice(KEY) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut provided_mac) = Hmac::<Sha256>::new_from_slice(KEY) else {
        return false;
    };
    provided_mac.update(provided.as_bytes());
    provided_mac.verify_slice(&expected_tag).is_ok()
}
