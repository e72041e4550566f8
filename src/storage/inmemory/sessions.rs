//! In-memory session records

use crate::oauth::types::SessionRecord;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct StoredSession {
    record: SessionRecord,
    expires_at: DateTime<Utc>,
}

/// Session records keyed by session id
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|stored| stored.expires_at > Utc::now())
            .map(|stored| stored.record.clone()))
    }

    async fn save_session(&self, session: &SessionRecord, expires_at: DateTime<Utc>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session.session_id.clone(),
            StoredSession {
                record: session.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }

    async fn cleanup_expired_sessions(&self) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = MemorySessionStore::new();
        let mut session = SessionRecord::new();
        session.client_id = Some("client-1".to_string());
        store
            .save_session(&session, Utc::now() + Duration::days(14))
            .await
            .unwrap();

        let loaded = store
            .load_session(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("client-1"));

        store.destroy_session(&session.session_id).await.unwrap();
        assert!(
            store
                .load_session(&session.session_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_expired_sessions_are_hidden_and_cleaned() {
        let store = MemorySessionStore::new();
        let expired = SessionRecord::new();
        let live = SessionRecord::new();
        store
            .save_session(&expired, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        store
            .save_session(&live, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(store.load_session(&expired.session_id).await.unwrap().is_none());
        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 1);
        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 0);
        assert!(store.load_session(&live.session_id).await.unwrap().is_some());
    }
}
