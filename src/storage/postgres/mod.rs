//! PostgreSQL storage implementations
//!
//! This module provides PostgreSQL-based implementations of all storage traits.
//! PostgreSQL is suitable for production deployments with several server
//! replicas: artifact locking relies on conditional updates, not on process
//! memory.

mod artifacts;
mod directory;
mod events;
mod rate_limits;
mod sessions;

use crate::errors::StorageError;
use sqlx::postgres::PgPool;

pub type Result<T> = std::result::Result<T, StorageError>;

/// PostgreSQL implementation of every persistent store
pub struct PostgresAuthStorage {
    pool: PgPool,
}

impl PostgresAuthStorage {
    /// Create a new PostgreSQL storage instance
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

pub(crate) fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::QueryFailed(e.to_string())
}

pub(crate) fn column_error(column: &str, e: sqlx::Error) -> StorageError {
    StorageError::DatabaseError(format!("Failed to get {}: {}", column, e))
}

/// Text form of a unit enum stored in a TEXT column
pub(crate) fn enum_to_text<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(text)) => Ok(text),
        Ok(other) => Err(StorageError::SerializationFailed(format!(
            "Expected a string, got {}",
            other
        ))),
        Err(e) => Err(StorageError::SerializationFailed(e.to_string())),
    }
}

pub(crate) fn enum_from_text<T: serde::de::DeserializeOwned>(text: String) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(text))
        .map_err(|e| StorageError::InvalidData(e.to_string()))
}
