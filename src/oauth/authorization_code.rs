//! PKCE-bound authorization codes, consumed exactly once at the token endpoint.

use serde::{Deserialize, Serialize};

use crate::errors::{ArtifactError, GrantError};
use crate::oauth::artifacts::EncryptedArtifacts;
use crate::oauth::crypto::sha256_base64url;

/// Everything the token endpoint needs to mint tokens for a login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCodePayload {
    pub user_id: String,
    pub client_id: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub callback_url: String,
    pub scope: String,
    pub audience: Option<String>,
    pub session_id: String,
}

#[derive(Clone)]
pub struct AuthorizationCodeManager {
    artifacts: EncryptedArtifacts<AuthorizationCodePayload>,
}

impl AuthorizationCodeManager {
    pub fn new(artifacts: EncryptedArtifacts<AuthorizationCodePayload>) -> Self {
        Self { artifacts }
    }

    /// Persist a code and return its external value
    pub async fn issue(&self, payload: AuthorizationCodePayload) -> Result<String, ArtifactError> {
        let session_id = payload.session_id.clone();
        let artifact = self.artifacts.create(payload, Some(&session_id)).await?;
        Ok(artifact.external_id)
    }

    /// Claim the code and check the client, the callback and the PKCE verifier.
    ///
    /// The code is consumed even when a later check fails. Every failure is
    /// the same [`GrantError::Rejected`].
    pub async fn verify_and_consume(
        &self,
        code: &str,
        client_id: &str,
        callback_url: &str,
        code_verifier: Option<&str>,
    ) -> Result<AuthorizationCodePayload, GrantError> {
        let artifact = match self.artifacts.find_and_lock(code).await {
            Ok(artifact) => artifact,
            Err(ArtifactError::NotFound) => return Err(GrantError::Rejected),
            Err(err) => {
                tracing::error!(error = ?err, "authorization code lookup failed");
                return Err(GrantError::Rejected);
            }
        };

        let payload = artifact.payload;
        let client_ok = payload.client_id == client_id;
        let callback_ok = payload.callback_url == callback_url;
        let pkce_ok = verify_pkce(
            payload.code_challenge.as_deref(),
            payload.code_challenge_method.as_deref(),
            code_verifier,
        );

        if client_ok & callback_ok & pkce_ok {
            Ok(payload)
        } else {
            tracing::debug!(client_id = %client_id, "authorization code rejected");
            Err(GrantError::Rejected)
        }
    }

    /// Remove a code after a completed exchange
    pub async fn delete(&self, code: &str) -> Result<(), ArtifactError> {
        self.artifacts.delete(code).await
    }
}

/// PKCE check. No stored challenge skips the check; `S256` compares the
/// verifier digest; any other method compares the verifier directly.
pub fn verify_pkce(
    code_challenge: Option<&str>,
    code_challenge_method: Option<&str>,
    code_verifier: Option<&str>,
) -> bool {
    let Some(challenge) = code_challenge.filter(|c| !c.is_empty()) else {
        return true;
    };
    let Some(verifier) = code_verifier else {
        return false;
    };

    let is_s256 = code_challenge_method.is_some_and(|method| method.eq_ignore_ascii_case("s256"));
    if is_s256 {
        sha256_base64url(verifier) == challenge
    } else {
        verifier == challenge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::crypto::CryptoBox;
    use crate::storage::inmemory::MemoryAuthStorage;
    use crate::storage::traits::ArtifactKind;
    use chrono::Duration;
    use futures::future::join_all;
    use std::sync::Arc;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    const CALLBACK: &str = "https://app.example.com/callback";

    fn manager() -> AuthorizationCodeManager {
        AuthorizationCodeManager::new(EncryptedArtifacts::new(
            Arc::new(MemoryAuthStorage::new()),
            CryptoBox::from_secret("code-secret"),
            ArtifactKind::AuthorizationCode,
            Duration::seconds(120),
        ))
    }

    fn payload(method: Option<&str>, challenge: Option<&str>) -> AuthorizationCodePayload {
        AuthorizationCodePayload {
            user_id: "user-1".to_string(),
            client_id: "client-1".to_string(),
            code_challenge: challenge.map(str::to_string),
            code_challenge_method: method.map(str::to_string),
            callback_url: CALLBACK.to_string(),
            scope: "openid".to_string(),
            audience: None,
            session_id: "session-1".to_string(),
        }
    }

    #[test]
    fn test_pkce_rules() {
        assert!(verify_pkce(Some(CHALLENGE), Some("S256"), Some(VERIFIER)));
        assert!(verify_pkce(Some(CHALLENGE), Some("s256"), Some(VERIFIER)));
        assert!(!verify_pkce(Some(CHALLENGE), Some("S256"), Some("wrong")));
        assert!(!verify_pkce(Some(CHALLENGE), Some("S256"), Some(CHALLENGE)));
        assert!(!verify_pkce(Some(CHALLENGE), Some("S256"), None));

        assert!(verify_pkce(Some("plain-value"), Some("plain"), Some("plain-value")));
        assert!(verify_pkce(Some("plain-value"), None, Some("plain-value")));
        assert!(!verify_pkce(Some("plain-value"), Some("plain"), Some("other")));

        assert!(verify_pkce(None, None, None));
        assert!(verify_pkce(None, Some("S256"), Some("anything")));
    }

    #[tokio::test]
    async fn test_exchange_once() {
        let codes = manager();
        let code = codes
            .issue(payload(Some("S256"), Some(CHALLENGE)))
            .await
            .unwrap();

        let exchanged = codes
            .verify_and_consume(&code, "client-1", CALLBACK, Some(VERIFIER))
            .await
            .unwrap();
        assert_eq!(exchanged.user_id, "user-1");

        let replay = codes
            .verify_and_consume(&code, "client-1", CALLBACK, Some(VERIFIER))
            .await;
        assert_eq!(replay, Err(GrantError::Rejected));
    }

    #[tokio::test]
    async fn test_failed_check_still_consumes() {
        let codes = manager();
        let code = codes
            .issue(payload(Some("S256"), Some(CHALLENGE)))
            .await
            .unwrap();

        let wrong_verifier = codes
            .verify_and_consume(&code, "client-1", CALLBACK, Some("wrong"))
            .await;
        assert_eq!(wrong_verifier, Err(GrantError::Rejected));

        let correct_after = codes
            .verify_and_consume(&code, "client-1", CALLBACK, Some(VERIFIER))
            .await;
        assert_eq!(correct_after, Err(GrantError::Rejected));
    }

    #[tokio::test]
    async fn test_client_and_callback_mismatch() {
        let codes = manager();

        let code = codes.issue(payload(None, None)).await.unwrap();
        let other_client = codes
            .verify_and_consume(&code, "client-2", CALLBACK, None)
            .await;
        assert_eq!(other_client, Err(GrantError::Rejected));

        let code = codes.issue(payload(None, None)).await.unwrap();
        let other_callback = codes
            .verify_and_consume(&code, "client-1", "https://evil.example.com/cb", None)
            .await;
        assert_eq!(other_callback, Err(GrantError::Rejected));

        let unknown = codes
            .verify_and_consume("bogus", "client-1", CALLBACK, None)
            .await;
        assert_eq!(unknown, Err(GrantError::Rejected));
    }

    #[tokio::test]
    async fn test_concurrent_exchange_has_single_winner() {
        let codes = manager();
        let code = codes
            .issue(payload(Some("S256"), Some(CHALLENGE)))
            .await
            .unwrap();

        let attempts = (0..16).map(|_| {
            codes.verify_and_consume(&code, "client-1", CALLBACK, Some(VERIFIER))
        });
        let results = join_all(attempts).await;

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let rejections = results
            .iter()
            .filter(|r| **r == Err(GrantError::Rejected))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(rejections, 15);
    }
}
