//! PostgreSQL session records

use super::{PostgresAuthStorage, column_error, query_error};
use crate::errors::StorageError;
use crate::oauth::types::SessionRecord;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::types::Json;

#[async_trait]
impl SessionStore for PostgresAuthStorage {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT record FROM sessions WHERE session_id = $1 AND expires_at > $2",
        )
        .bind(session_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let Json(record): Json<SessionRecord> =
                    row.try_get("record").map_err(|e| column_error("record", e))?;
                if record.session_id != session_id {
                    return Err(StorageError::InvalidData(format!(
                        "Session {} holds a foreign record",
                        session_id
                    )));
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &SessionRecord, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, record, updated_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id) DO UPDATE SET
                record = EXCLUDED.record,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&session.session_id)
        .bind(Json(session))
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn cleanup_expired_sessions(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() as usize)
    }
}
