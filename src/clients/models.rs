use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub inbound_address: String,
    pub status: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub contact_email: Option<String>,
    pub inbound_address: String,
    /// Defaults to "active"
    pub status: Option<String>,
}
