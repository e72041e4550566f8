//! In-memory rate-limit counters

use super::{MemoryAuthStorage, lock};
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
impl RateLimitStore for MemoryAuthStorage {
    async fn consume_points(
        &self,
        key: &str,
        points: u32,
        limit: u32,
        window: chrono::Duration,
    ) -> Result<RateLimitCounter> {
        let mut counters = lock(&self.rate_limits)?;
        let now = Utc::now();

        let counter = counters
            .entry(key.to_string())
            .or_insert_with(|| RateLimitCounter {
                key: key.to_string(),
                points: 0,
                window_start: now,
            });

        if counter.window_start + window <= now {
            counter.points = 0;
            counter.window_start = now;
        }
        counter.points = counter
            .points
            .saturating_add(points)
            .min(limit.saturating_add(points));

        Ok(counter.clone())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<RateLimitCounter>> {
        let counters = lock(&self.rate_limits)?;
        Ok(counters.get(key).cloned())
    }

    async fn reset_counter(&self, key: &str) -> Result<()> {
        let mut counters = lock(&self.rate_limits)?;
        counters.remove(key);
        Ok(())
    }

    async fn cleanup_counters(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut counters = lock(&self.rate_limits)?;
        let initial_count = counters.len();
        counters.retain(|_, counter| counter.window_start >= older_than);
        Ok(initial_count - counters.len())
    }
}
