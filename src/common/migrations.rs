// src/common/migrations.rs
//! Database schema management

use sqlx::SqlitePool;
use std::env;
use tracing::{info, warn};

/// Create every table and index the pipeline needs.
///
/// Tables are only dropped when `RESET_DB=true`; otherwise creation is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let should_reset_db = env::var("RESET_DB").unwrap_or_else(|_| "false".to_string()) == "true";

    if should_reset_db {
        warn!("⚠️  RESET_DB=true - Dropping all tables and recreating schema...");
        drop_all_tables(pool).await?;
        info!("✅ Dropped old tables");
    }

    create_core_tables(pool).await?;
    create_inbound_tables(pool).await?;
    create_queue_tables(pool).await?;
    create_indexes(pool).await?;

    info!("✅ Database migration completed successfully!");

    Ok(())
}

async fn drop_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for table in ["email_queue", "inbound_emails", "clients", "users"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn create_core_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // inbound_address is the alias the agency hands out for a client's applications
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact_email TEXT,
            inbound_address TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_inbound_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inbound_emails (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            client_id TEXT,
            message_id TEXT,
            in_reply_to TEXT,
            from_address TEXT NOT NULL,
            from_name TEXT,
            to_address TEXT NOT NULL,
            subject TEXT NOT NULL,
            text_content TEXT,
            html_content TEXT,
            reply_to_address TEXT,
            status TEXT NOT NULL DEFAULT 'unread',
            envelope TEXT,
            received_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY(client_id) REFERENCES clients(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_queue_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_queue (
            id TEXT PRIMARY KEY,
            to_address TEXT NOT NULL,
            to_name TEXT,
            from_address TEXT,
            from_name TEXT,
            reply_to_address TEXT,
            subject TEXT NOT NULL,
            html_content TEXT,
            text_content TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            scheduled_at TEXT NOT NULL DEFAULT (datetime('now')),
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            error_message TEXT,
            thread_id TEXT,
            claim_token TEXT,
            claimed_at TEXT,
            provider_message_id TEXT,
            sent_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_clients_inbound_address ON clients(inbound_address COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_inbound_emails_thread ON inbound_emails(thread_id, received_at)",
        "CREATE INDEX IF NOT EXISTS idx_inbound_emails_client ON inbound_emails(client_id, received_at)",
        // Superseded by the per-owner index below
        "DROP INDEX IF EXISTS idx_inbound_emails_message_id",
        // One row per Message-ID and owner (client, or destination when unmatched).
        // NULL Message-IDs stay distinct and never collide.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_inbound_emails_message_owner ON inbound_emails(message_id, COALESCE(client_id, to_address))",
        "CREATE INDEX IF NOT EXISTS idx_email_queue_due ON email_queue(status, priority DESC, scheduled_at)",
        "CREATE INDEX IF NOT EXISTS idx_email_queue_provider_id ON email_queue(provider_message_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("📊 Created pipeline indexes");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_test_db;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = setup_test_db().await;
        super::run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        for expected in ["clients", "email_queue", "inbound_emails", "users"] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_client_inbound_address_unique_case_insensitive() {
        let pool = setup_test_db().await;

        sqlx::query("INSERT INTO clients (id, name, inbound_address) VALUES ('C_1', 'A', 'jane@mail.test')")
            .execute(&pool)
            .await
            .unwrap();
        let dup = sqlx::query("INSERT INTO clients (id, name, inbound_address) VALUES ('C_2', 'B', 'JANE@mail.test')")
            .execute(&pool)
            .await;

        assert!(dup.is_err());
    }
}
