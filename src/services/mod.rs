// src/services/mod.rs
//
// Integrations shared by the domain modules: SES delivery, reply templates
// and error tracking

pub mod aws;
pub mod email;
pub mod monitoring;

pub use aws::{AWSService, SesConfig};
