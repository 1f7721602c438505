use super::models::CreateClientRequest;
use crate::common::{ValidationResult, Validator};
use crate::inbound::normalizer::is_plausible_address;

pub const CLIENT_STATUSES: [&str; 2] = ["active", "inactive"];

impl Validator<CreateClientRequest> for CreateClientRequest {
    fn validate(&self, data: &CreateClientRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.name.trim().is_empty() {
            result.add_error("name", "Client name is required");
        } else if data.name.len() > 255 {
            result.add_error("name", "Client name must not exceed 255 characters");
        }

        if !is_plausible_address(&data.inbound_address) {
            result.add_error("inbound_address", "Must be a valid email address");
        }

        if let Some(contact) = data.contact_email.as_deref() {
            if !contact.trim().is_empty() && !is_plausible_address(contact) {
                result.add_error("contact_email", "Must be a valid email address");
            }
        }

        if let Some(status) = data.status.as_deref() {
            if !CLIENT_STATUSES.contains(&status) {
                result.add_error("status", "Status must be 'active' or 'inactive'");
            }
        }

        result
    }
}
