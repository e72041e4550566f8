//! Trait-based storage abstractions with in-memory and PostgreSQL backends.

pub mod inmemory;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use inmemory::{MemoryAuthStorage, MemorySessionStore};
pub use traits::*;

#[cfg(feature = "postgres")]
pub use postgres::PostgresAuthStorage;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::StorageError;
use crate::oauth::rate_limit::RateLimiter;

/// Storage backend configuration
#[derive(Clone)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "postgres")]
    Postgres(String), // Connection string
}

/// Every store the server talks to, as trait objects
#[derive(Clone)]
pub struct Stores {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub clients: Arc<dyn ClientStore>,
    pub apis: Arc<dyn ApiStore>,
    pub users: Arc<dyn UserStore>,
    pub events: Arc<dyn EventStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// Use one backend for every persistent store. Sessions start in memory;
    /// see [`Stores::with_sessions`].
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: AuthStorage + 'static,
    {
        Self {
            artifacts: backend.clone(),
            rate_limits: backend.clone(),
            clients: backend.clone(),
            apis: backend.clone(),
            users: backend.clone(),
            events: backend,
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }
}

/// Create the stores for a backend
pub async fn create_storage_backend(
    backend: StorageBackend,
) -> std::result::Result<Stores, StorageError> {
    match backend {
        StorageBackend::Memory => Ok(Stores::from_backend(Arc::new(MemoryAuthStorage::new()))),
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres(database_url) => {
            let pool = sqlx::postgres::PgPool::connect(&database_url)
                .await
                .map_err(|e| {
                    StorageError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
                })?;

            let storage = Arc::new(postgres::PostgresAuthStorage::new(pool));

            // Run migrations
            storage.migrate().await?;

            Ok(Stores::from_backend(storage.clone()).with_sessions(storage))
        }
    }
}

/// Parse storage backend from configuration string
pub fn parse_storage_backend(
    backend_name: &str,
    database_url: Option<&str>,
) -> std::result::Result<StorageBackend, StorageError> {
    match backend_name {
        "memory" => Ok(StorageBackend::Memory),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = database_url.ok_or_else(|| {
                StorageError::InvalidData("DATABASE_URL required for postgres backend".to_string())
            })?;
            Ok(StorageBackend::Postgres(url.to_string()))
        }
        _ => {
            let _ = database_url;
            Err(StorageError::InvalidData(format!(
                "Unknown storage backend: {}",
                backend_name
            )))
        }
    }
}

/// Periodically delete expired artifacts and stale rate-limit counters
/// until `token` is cancelled
pub async fn run_reaper(
    stores: Stores,
    rate_limiter: RateLimiter,
    interval: std::time::Duration,
    token: CancellationToken,
) {
    // `interval` panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_secs(1)));
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match stores.artifacts.cleanup_expired_artifacts().await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "removed expired artifacts"),
            Err(err) => tracing::error!(error = ?err, "artifact cleanup failed"),
        }

        match stores.sessions.cleanup_expired_sessions().await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "removed expired sessions"),
            Err(err) => tracing::error!(error = ?err, "session cleanup failed"),
        }

        match rate_limiter.cleanup().await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "removed stale rate limit counters"),
            Err(err) => tracing::error!(error = ?err, "rate limit cleanup failed"),
        }
    }
    tracing::info!("artifact reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::oauth::types::SessionRecord;
    use crate::storage::traits::NewArtifact;
    use chrono::Utc;

    #[test]
    fn test_parse_storage_backend() {
        assert!(matches!(
            parse_storage_backend("memory", None),
            Ok(StorageBackend::Memory)
        ));
        assert!(parse_storage_backend("mongodb", None).is_err());
        #[cfg(feature = "postgres")]
        {
            assert!(parse_storage_backend("postgres", None).is_err());
            assert!(matches!(
                parse_storage_backend("postgres", Some("postgres://localhost/vsauth")),
                Ok(StorageBackend::Postgres(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_reaper_removes_expired_artifacts_and_sessions() {
        let stores = Stores::from_backend(Arc::new(MemoryAuthStorage::new()));
        let expired = stores
            .artifacts
            .create_artifact(NewArtifact {
                kind: ArtifactKind::State,
                payload: "sealed".to_string(),
                session_id: None,
                expires_at: Utc::now() - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();
        let session = SessionRecord::new();
        stores
            .sessions
            .save_session(&session, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let rate_limiter = RateLimiter::new(stores.rate_limits.clone(), RateLimitConfig::default());
        let reaper = tokio::spawn(run_reaper(
            stores.clone(),
            rate_limiter,
            std::time::Duration::from_millis(10),
            token.clone(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        reaper.await.unwrap();

        assert!(
            stores
                .artifacts
                .find_artifact(ArtifactKind::State, &expired.id)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(stores.artifacts.cleanup_expired_artifacts().await.unwrap(), 0);
        assert_eq!(stores.sessions.cleanup_expired_sessions().await.unwrap(), 0);
    }
}
