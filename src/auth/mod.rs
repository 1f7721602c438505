//! # Auth Module
//!
//! Bearer-token verification for the dashboard-facing routes. Tokens are
//! minted by the main platform; this service only validates them.

pub mod extractors;
pub mod models;


pub use extractors::AuthedUser;
