//! # Inbound Module
//!
//! Receives email on behalf of clients: normalizes provider payloads,
//! resolves the owning client, assigns a conversation thread, deduplicates
//! by Message-ID and stores the result in the inbox.

pub mod handlers;
pub mod models;
pub mod normalizer;
pub mod receiver;
pub mod routes;
pub mod store;
pub mod threads;


pub use routes::inbound_routes;
