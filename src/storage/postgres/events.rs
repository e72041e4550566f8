//! PostgreSQL audit event sink

use super::{PostgresAuthStorage, column_error, enum_from_text, enum_to_text, query_error};
use crate::oauth::types::AuditEvent;
use crate::storage::traits::*;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;

fn row_to_event(row: &PgRow) -> Result<AuditEvent> {
    let event_type: String = row
        .try_get("event_type")
        .map_err(|e| column_error("event_type", e))?;
    Ok(AuditEvent {
        event_type: enum_from_text(event_type)?,
        client_id: row
            .try_get("client_id")
            .map_err(|e| column_error("client_id", e))?,
        client_name: row
            .try_get("client_name")
            .map_err(|e| column_error("client_name", e))?,
        ip: row.try_get("ip").map_err(|e| column_error("ip", e))?,
        user_agent: row
            .try_get("user_agent")
            .map_err(|e| column_error("user_agent", e))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| column_error("user_id", e))?,
        email: row.try_get("email").map_err(|e| column_error("email", e))?,
        description: row
            .try_get("description")
            .map_err(|e| column_error("description", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| column_error("created_at", e))?,
    })
}

#[async_trait]
impl EventStore for PostgresAuthStorage {
    async fn record_event(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                event_type, client_id, client_name, ip, user_agent,
                user_id, email, description, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(enum_to_text(&event.event_type)?)
        .bind(&event.client_id)
        .bind(&event.client_name)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(&event.user_id)
        .bind(&event.email)
        .bind(&event.description)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn list_events(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        // Newest first; a NULL limit returns every row
        let rows = sqlx::query("SELECT * FROM events ORDER BY id DESC LIMIT $1")
            .bind(limit.map(|limit| limit as i64))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        rows.iter().map(row_to_event).collect()
    }
}
