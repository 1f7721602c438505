use super::models::{Client, CreateClientRequest};
use crate::common::{generate_client_id, normalize_address, safe_email_log, ApiError, Validator};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub struct ClientResolver {
    db: SqlitePool,
}

impl ClientResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Active client whose inbound address equals `address`, ignoring case.
    /// No wildcard or plus-tag folding.
    pub async fn resolve(&self, address: &str) -> Result<Option<String>, ApiError> {
        let normalized = normalize_address(address);
        if normalized.is_empty() {
            return Ok(None);
        }

        let client_id = sqlx::query_scalar::<_, String>(
            "SELECT id FROM clients WHERE lower(inbound_address) = ? AND status = 'active'",
        )
        .bind(&normalized)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        debug!(
            address = %safe_email_log(&normalized),
            matched = client_id.is_some(),
            "Client resolution"
        );

        Ok(client_id)
    }

    /// First candidate that resolves wins
    pub async fn resolve_any(
        &self,
        candidates: &[String],
    ) -> Result<Option<(String, String)>, ApiError> {
        for candidate in candidates {
            if let Some(client_id) = self.resolve(candidate).await? {
                return Ok(Some((client_id, candidate.clone())));
            }
        }
        Ok(None)
    }

    pub async fn create_client(&self, request: CreateClientRequest) -> Result<Client, ApiError> {
        request.validate(&request).into_result()?;

        let inbound_address = normalize_address(&request.inbound_address);

        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM clients WHERE lower(inbound_address) = ?",
        )
        .bind(&inbound_address)
        .fetch_one(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        if taken > 0 {
            return Err(ApiError::BadRequest(
                "Inbound address is already assigned to another client".to_string(),
            ));
        }

        let client_id = generate_client_id();
        let status = request.status.unwrap_or_else(|| "active".to_string());
        let contact_email = request
            .contact_email
            .map(|c| normalize_address(&c))
            .filter(|c| !c.is_empty());

        sqlx::query(
            "INSERT INTO clients (id, name, contact_email, inbound_address, status, created_at) VALUES (?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(&client_id)
        .bind(request.name.trim())
        .bind(&contact_email)
        .bind(&inbound_address)
        .bind(&status)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        info!(
            client_id = %client_id,
            inbound_address = %safe_email_log(&inbound_address),
            "Client registered"
        );

        self.get_client(&client_id).await
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Client, ApiError> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?")
            .bind(client_id)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?
            .ok_or_else(|| ApiError::NotFound("Client not found".to_string()))
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>, ApiError> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients ORDER BY name ASC")
            .fetch_all(&self.db)
            .await
            .map_err(ApiError::DatabaseError)
    }
}
