// src/common/id_generator.rs
//! Crockford Base32 ID Generator
//!
//! Generates human-readable, prefixed IDs using Crockford Base32 encoding.
//! Format: PREFIX_XXXXXX (e.g., E_K7NP3X for an inbound email)
//!
//! The alphabet excludes I, L, O and U so IDs survive being read aloud or
//! copied out of an email client.

use rand::Rng;

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Random part length. Threads and queue entries get longer IDs since they
/// accumulate faster than clients.
const DEFAULT_LENGTH: usize = 6;
const LONG_LENGTH: usize = 10;

/// Entity type prefixes for ID generation
#[derive(Debug, Clone, Copy)]
pub enum EntityPrefix {
    /// Client (C_)
    Client,
    /// Inbound email row (E_)
    InboundEmail,
    /// Conversation thread (TH_)
    Thread,
    /// Outbound queue entry (Q_)
    QueueEntry,
}

impl EntityPrefix {
    /// Get the string prefix for this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Client => "C",
            EntityPrefix::InboundEmail => "E",
            EntityPrefix::Thread => "TH",
            EntityPrefix::QueueEntry => "Q",
        }
    }

    fn default_length(&self) -> usize {
        match self {
            EntityPrefix::Client => DEFAULT_LENGTH,
            EntityPrefix::InboundEmail | EntityPrefix::Thread | EntityPrefix::QueueEntry => {
                LONG_LENGTH
            }
        }
    }
}

/// Generate a random Crockford Base32 string of specified length
fn generate_crockford_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..32);
            CROCKFORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a prefixed ID, e.g. "TH_4K7NP3XQ2M"
pub fn generate_id(prefix: EntityPrefix) -> String {
    format!(
        "{}_{}",
        prefix.as_str(),
        generate_crockford_string(prefix.default_length())
    )
}

/// Unprefixed random token
pub fn generate_raw_id(length: usize) -> String {
    generate_crockford_string(length)
}

pub fn generate_client_id() -> String {
    generate_id(EntityPrefix::Client)
}

pub fn generate_inbound_email_id() -> String {
    generate_id(EntityPrefix::InboundEmail)
}

pub fn generate_thread_id() -> String {
    generate_id(EntityPrefix::Thread)
}

pub fn generate_queue_entry_id() -> String {
    generate_id(EntityPrefix::QueueEntry)
}
