//! # Outbound Module
//!
//! Email queue: entries are enqueued with priority and schedule, then drained
//! by the processor, which claims each entry, attempts delivery through an
//! `EmailSender` and settles it as sent, rescheduled or failed.

pub mod handlers;
pub mod models;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod routes;
pub mod sender;


pub use processor::QueueProcessor;
pub use queue::OutboundQueue;
pub use routes::outbound_routes;
