//! PostgreSQL artifact storage

use super::{PostgresAuthStorage, column_error, query_error};
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::PgRow;
use ulid::Ulid;

fn row_to_artifact(row: &PgRow) -> Result<ArtifactRecord> {
    let kind: String = row.try_get("kind").map_err(|e| column_error("kind", e))?;
    Ok(ArtifactRecord {
        id: row.try_get("id").map_err(|e| column_error("id", e))?,
        kind: kind.parse()?,
        payload: row.try_get("payload").map_err(|e| column_error("payload", e))?,
        consumed: row
            .try_get("consumed")
            .map_err(|e| column_error("consumed", e))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| column_error("session_id", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| column_error("created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| column_error("updated_at", e))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| column_error("expires_at", e))?,
    })
}

#[async_trait]
impl ArtifactStore for PostgresAuthStorage {
    async fn create_artifact(&self, artifact: NewArtifact) -> Result<ArtifactRecord> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO artifacts (
                id, kind, payload, consumed, session_id, created_at, updated_at, expires_at
            ) VALUES ($1, $2, $3, FALSE, $4, $5, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Ulid::new().to_string())
        .bind(artifact.kind.as_str())
        .bind(&artifact.payload)
        .bind(&artifact.session_id)
        .bind(now)
        .bind(artifact.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        row_to_artifact(&row)
    }

    async fn find_artifact(&self, kind: ArtifactKind, id: &str) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query(
            "SELECT * FROM artifacts WHERE kind = $1 AND id = $2 AND expires_at > $3",
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(row_to_artifact).transpose()
    }

    async fn lock_artifact(&self, kind: ArtifactKind, id: &str) -> Result<Option<ArtifactRecord>> {
        // Single conditional update; the row lock serializes racing callers
        let row = sqlx::query(
            r#"
            UPDATE artifacts SET consumed = TRUE, updated_at = $3
            WHERE kind = $1 AND id = $2 AND consumed = FALSE AND expires_at > $3
            RETURNING *
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(row_to_artifact).transpose()
    }

    async fn delete_artifact(&self, kind: ArtifactKind, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM artifacts WHERE kind = $1 AND id = $2")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn delete_artifacts_by_session(
        &self,
        kind: ArtifactKind,
        session_id: &str,
    ) -> Result<usize> {
        let result = sqlx::query("DELETE FROM artifacts WHERE kind = $1 AND session_id = $2")
            .bind(kind.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() as usize)
    }

    async fn cleanup_expired_artifacts(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM artifacts WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() as usize)
    }
}
