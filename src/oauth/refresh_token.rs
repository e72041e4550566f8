//! Refresh tokens for offline access, rotated on every use.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{ArtifactError, GrantError};
use crate::oauth::artifacts::EncryptedArtifacts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenPayload {
    pub client_id: String,
    pub user_id: String,
    pub callback_url: String,
    pub scope: String,
    pub audience: Option<String>,
}

/// A refresh token claimed for rotation
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRefreshToken {
    pub payload: RefreshTokenPayload,
    pub session_id: Option<String>,
}

#[derive(Clone)]
pub struct RefreshTokenManager {
    artifacts: EncryptedArtifacts<RefreshTokenPayload>,
}

impl RefreshTokenManager {
    pub fn new(artifacts: EncryptedArtifacts<RefreshTokenPayload>) -> Self {
        Self { artifacts }
    }

    /// Persist a refresh token; `ttl` of `None` uses the configured default
    pub async fn issue(
        &self,
        payload: RefreshTokenPayload,
        session_id: &str,
        ttl: Option<Duration>,
    ) -> Result<String, ArtifactError> {
        let artifact = match ttl {
            Some(ttl) => {
                self.artifacts
                    .create_with_ttl(payload, Some(session_id), ttl)
                    .await?
            }
            None => self.artifacts.create(payload, Some(session_id)).await?,
        };
        Ok(artifact.external_id)
    }

    /// Claim the token and check it belongs to `client_id` and `callback_url`.
    /// The caller deletes it once the replacement has been issued.
    pub async fn consume_and_rotate(
        &self,
        refresh_token: &str,
        client_id: &str,
        callback_url: &str,
    ) -> Result<ConsumedRefreshToken, GrantError> {
        let artifact = match self.artifacts.find_and_lock(refresh_token).await {
            Ok(artifact) => artifact,
            Err(ArtifactError::NotFound) => return Err(GrantError::Rejected),
            Err(err) => {
                tracing::error!(error = ?err, "refresh token lookup failed");
                return Err(GrantError::Rejected);
            }
        };

        let client_ok = artifact.payload.client_id == client_id;
        let callback_ok = artifact.payload.callback_url == callback_url;
        if !(client_ok & callback_ok) {
            tracing::debug!(client_id = %client_id, "refresh token rejected");
            return Err(GrantError::Rejected);
        }

        Ok(ConsumedRefreshToken {
            payload: artifact.payload,
            session_id: artifact.session_id,
        })
    }

    pub async fn delete(&self, refresh_token: &str) -> Result<(), ArtifactError> {
        self.artifacts.delete(refresh_token).await
    }

    /// Remove every refresh token issued under a session (logout)
    pub async fn delete_by_session(&self, session_id: &str) -> Result<usize, ArtifactError> {
        self.artifacts.delete_by_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::crypto::CryptoBox;
    use crate::storage::inmemory::MemoryAuthStorage;
    use crate::storage::traits::ArtifactKind;
    use futures::future::join_all;
    use std::sync::Arc;

    const CALLBACK: &str = "https://app.example.com/callback";

    fn manager() -> RefreshTokenManager {
        RefreshTokenManager::new(EncryptedArtifacts::new(
            Arc::new(MemoryAuthStorage::new()),
            CryptoBox::from_secret("refresh-secret"),
            ArtifactKind::RefreshToken,
            Duration::seconds(86400),
        ))
    }

    fn payload() -> RefreshTokenPayload {
        RefreshTokenPayload {
            client_id: "client-1".to_string(),
            user_id: "user-1".to_string(),
            callback_url: CALLBACK.to_string(),
            scope: "openid offline_access".to_string(),
            audience: Some("https://api.example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_consume_once() {
        let tokens = manager();
        let token = tokens.issue(payload(), "session-1", None).await.unwrap();

        let consumed = tokens
            .consume_and_rotate(&token, "client-1", CALLBACK)
            .await
            .unwrap();
        assert_eq!(consumed.payload, payload());
        assert_eq!(consumed.session_id.as_deref(), Some("session-1"));

        let reuse = tokens
            .consume_and_rotate(&token, "client-1", CALLBACK)
            .await;
        assert_eq!(reuse, Err(GrantError::Rejected));
    }

    #[tokio::test]
    async fn test_wrong_client_rejected() {
        let tokens = manager();
        let token = tokens.issue(payload(), "session-1", None).await.unwrap();
        let result = tokens.consume_and_rotate(&token, "client-2", CALLBACK).await;
        assert_eq!(result, Err(GrantError::Rejected));
    }

    #[tokio::test]
    async fn test_wrong_callback_rejected() {
        let tokens = manager();
        let token = tokens.issue(payload(), "session-1", None).await.unwrap();
        let result = tokens.consume_and_rotate(&token, "client-1", "").await;
        assert_eq!(result, Err(GrantError::Rejected));

        let token = tokens.issue(payload(), "session-1", None).await.unwrap();
        let result = tokens
            .consume_and_rotate(&token, "client-1", "https://evil.example.com/callback")
            .await;
        assert_eq!(result, Err(GrantError::Rejected));
    }

    #[tokio::test]
    async fn test_delete_by_session() {
        let tokens = manager();
        let first = tokens.issue(payload(), "session-1", None).await.unwrap();
        let second = tokens
            .issue(payload(), "session-1", Some(Duration::days(30)))
            .await
            .unwrap();
        let other = tokens.issue(payload(), "session-2", None).await.unwrap();

        assert_eq!(tokens.delete_by_session("session-1").await.unwrap(), 2);
        for token in [&first, &second] {
            assert_eq!(
                tokens.consume_and_rotate(token, "client-1", CALLBACK).await,
                Err(GrantError::Rejected)
            );
        }
        assert!(tokens.consume_and_rotate(&other, "client-1", CALLBACK).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_single_winner() {
        let tokens = manager();
        let token = tokens.issue(payload(), "session-1", None).await.unwrap();

        let results = join_all(
            (0..16).map(|_| tokens.consume_and_rotate(&token, "client-1", CALLBACK)),
        )
        .await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }
}
