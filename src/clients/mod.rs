//! # Clients Module
//!
//! Job-seeker clients and the inbound addresses assigned to them. The
//! resolver maps an inbound destination address to the owning client.

pub mod handlers;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod validators;

pub use resolver::ClientResolver;
pub use routes::clients_routes;
