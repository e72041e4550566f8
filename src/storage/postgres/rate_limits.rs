//! PostgreSQL rate-limit counters

use super::{PostgresAuthStorage, column_error, query_error};
use crate::errors::StorageError;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;

fn row_to_counter(row: &PgRow) -> Result<RateLimitCounter> {
    let points: i64 = row.try_get("points").map_err(|e| column_error("points", e))?;
    Ok(RateLimitCounter {
        key: row.try_get("key").map_err(|e| column_error("key", e))?,
        points: u32::try_from(points)
            .map_err(|e| StorageError::InvalidData(format!("Invalid points: {}", e)))?,
        window_start: row
            .try_get("window_start")
            .map_err(|e| column_error("window_start", e))?,
    })
}

#[async_trait]
impl RateLimitStore for PostgresAuthStorage {
    async fn consume_points(
        &self,
        key: &str,
        points: u32,
        limit: u32,
        window: chrono::Duration,
    ) -> Result<RateLimitCounter> {
        let now = Utc::now();
        let window_floor = now - window;
        let points = i64::from(points);
        let cap = i64::from(limit) + points;

        // Increment, window roll-over and cap are one statement
        let row = sqlx::query(
            r#"
            INSERT INTO rate_limits (key, points, window_start)
            VALUES ($1, LEAST($2, $3), $4)
            ON CONFLICT (key) DO UPDATE SET
                points = CASE
                    WHEN rate_limits.window_start <= $5 THEN LEAST($2, $3)
                    ELSE LEAST(rate_limits.points + $2, $3)
                END,
                window_start = CASE
                    WHEN rate_limits.window_start <= $5 THEN $4
                    ELSE rate_limits.window_start
                END
            RETURNING key, points, window_start
            "#,
        )
        .bind(key)
        .bind(points)
        .bind(cap)
        .bind(now)
        .bind(window_floor)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        row_to_counter(&row)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<RateLimitCounter>> {
        let row = sqlx::query("SELECT key, points, window_start FROM rate_limits WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(row_to_counter).transpose()
    }

    async fn reset_counter(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM rate_limits WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn cleanup_counters(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() as usize)
    }
}
