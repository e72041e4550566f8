//! Point-bucket rate limiting.
//!
//! Each [`RateLimitAxis`] has its own keyspace and budget. A bucket is reached
//! once more than `limit` points have been consumed inside the current window.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{RateLimitConfig, RateLimitSettings};
use crate::errors::StorageError;
use crate::storage::traits::RateLimitStore;

/// Keyspace of a rate-limit bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAxis {
    /// Per client IP login attempts
    Login,
    /// Per (email, IP) failed logins, feeding the lockout
    FailedLogin,
    /// Per client IP forgot-password requests
    ForgotPassword,
    /// Per (session, IP) userinfo requests
    UserInfo,
}

impl RateLimitAxis {
    pub fn prefix(&self) -> &'static str {
        match self {
            RateLimitAxis::Login => "login_api_",
            RateLimitAxis::FailedLogin => "failed_email_password_login_",
            RateLimitAxis::ForgotPassword => "forgot_password_",
            RateLimitAxis::UserInfo => "user_info_api_",
        }
    }

    /// Build the counter key from its identifying parts
    pub fn key(&self, parts: &[&str]) -> String {
        format!("{}{}", self.prefix(), parts.join("_"))
    }
}

/// Budget of one bucket
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: chrono::Duration,
}

impl From<&RateLimitSettings> for RateLimitPolicy {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            limit: *settings.points.as_ref(),
            window: *settings.reset.as_ref(),
        }
    }
}

/// Outcome of consuming points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub consumed_points: u32,
    pub limit: u32,
    pub is_limit_reached: bool,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Points left in the window, never negative
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.consumed_points)
    }
}

/// Rate limiter over a shared counter store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn policy(&self, axis: RateLimitAxis) -> RateLimitPolicy {
        match axis {
            RateLimitAxis::Login => (&self.config.login).into(),
            RateLimitAxis::FailedLogin => (&self.config.failed_login).into(),
            RateLimitAxis::ForgotPassword => (&self.config.forgot_password).into(),
            RateLimitAxis::UserInfo => (&self.config.user_info).into(),
        }
    }

    /// Consume `points` from the bucket identified by `parts`
    pub async fn consume(
        &self,
        axis: RateLimitAxis,
        parts: &[&str],
        points: u32,
    ) -> Result<RateLimitDecision, StorageError> {
        let policy = self.policy(axis);
        let key = axis.key(parts);
        let counter = self
            .store
            .consume_points(&key, points, policy.limit, policy.window)
            .await?;

        let decision = RateLimitDecision {
            consumed_points: counter.points,
            limit: policy.limit,
            is_limit_reached: counter.points > policy.limit,
            reset_at: counter.window_start + policy.window,
        };

        if decision.is_limit_reached {
            tracing::warn!(key = %key, limit = policy.limit, "rate limit reached");
        }
        Ok(decision)
    }

    /// Clear a bucket, used when an account is unblocked
    pub async fn reset(&self, axis: RateLimitAxis, parts: &[&str]) -> Result<(), StorageError> {
        self.store.reset_counter(&axis.key(parts)).await
    }

    /// Drop counters whose window ended a long time ago
    pub async fn cleanup(&self) -> Result<usize, StorageError> {
        let longest = [
            &self.config.login,
            &self.config.failed_login,
            &self.config.forgot_password,
            &self.config.user_info,
        ]
        .iter()
        .map(|settings| *settings.reset.as_ref())
        .max()
        .unwrap_or_else(|| chrono::Duration::hours(1));

        self.store.cleanup_counters(Utc::now() - longest).await
    }
}
