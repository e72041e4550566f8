//! Single-use action tickets delivered by email.
//!
//! A ticket carries its own link lifetime in `expires_at`. The stored record
//! outlives it by a retention period so an expired link can still be told
//! apart from one that was used or never existed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ArtifactError, TicketError};
use crate::oauth::artifacts::{Artifact, EncryptedArtifacts};

/// Action a ticket authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketAction {
    VerifyEmail,
    PasswordResetEmail,
    BlockedAccountEmail,
}

impl TicketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketAction::VerifyEmail => "VERIFY_EMAIL",
            TicketAction::PasswordResetEmail => "PASSWORD_RESET_EMAIL",
            TicketAction::BlockedAccountEmail => "BLOCKED_ACCOUNT_EMAIL",
        }
    }

    /// Path segment of the action link
    pub fn route(&self) -> &'static str {
        match self {
            TicketAction::VerifyEmail => "verify-email",
            TicketAction::PasswordResetEmail => "reset-password",
            TicketAction::BlockedAccountEmail => "unblock-account",
        }
    }

    pub fn from_route(route: &str) -> Option<Self> {
        match route {
            "verify-email" => Some(TicketAction::VerifyEmail),
            "reset-password" => Some(TicketAction::PasswordResetEmail),
            "unblock-account" => Some(TicketAction::BlockedAccountEmail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInformation {
    pub client_id: String,
    pub client_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketContext {
    pub action: TicketAction,
    pub request_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    pub user_id: String,
    pub client_information: ClientInformation,
    pub context: TicketContext,
    /// End of the link lifetime
    pub expires_at: DateTime<Utc>,
}

impl TicketPayload {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Clone)]
pub struct TicketManager {
    artifacts: EncryptedArtifacts<TicketPayload>,
    retention: Duration,
}

impl TicketManager {
    pub fn new(artifacts: EncryptedArtifacts<TicketPayload>, retention: Duration) -> Self {
        Self {
            artifacts,
            retention,
        }
    }

    /// Create a ticket whose link is valid for `lifetime`
    pub async fn issue(
        &self,
        user_id: &str,
        client_information: ClientInformation,
        action: TicketAction,
        request_ip: &str,
        lifetime: Duration,
    ) -> Result<String, ArtifactError> {
        let payload = TicketPayload {
            user_id: user_id.to_string(),
            client_information,
            context: TicketContext {
                action,
                request_ip: request_ip.to_string(),
            },
            expires_at: Utc::now() + lifetime,
        };
        let artifact = self
            .artifacts
            .create_with_ttl(payload, None, lifetime + self.retention)
            .await?;
        Ok(artifact.external_id)
    }

    /// Look a ticket up without claiming it
    pub async fn resolve(&self, ticket: &str) -> Result<Artifact<TicketPayload>, TicketError> {
        let artifact = self.artifacts.find_by_id(ticket).await.map_err(map_lookup)?;
        if artifact.payload.is_expired(Utc::now()) {
            return Err(TicketError::Expired);
        }
        if artifact.consumed {
            return Err(TicketError::NotFound);
        }
        Ok(artifact)
    }

    /// Claim a ticket for its action. Concurrent claims have one winner.
    pub async fn claim(&self, ticket: &str) -> Result<Artifact<TicketPayload>, TicketError> {
        self.resolve(ticket).await?;
        self.artifacts
            .find_and_lock(ticket)
            .await
            .map_err(map_lookup)
    }

    /// Delete the ticket after its action completed
    pub async fn consume(&self, ticket: &str) -> Result<(), ArtifactError> {
        self.artifacts.delete(ticket).await
    }
}

/// Link embedded in the email for a ticket
pub fn action_url(external_base: &str, action: TicketAction, ticket: &str) -> String {
    let base = format!("{}/tickets/{}", external_base.trim_end_matches('/'), action.route());
    match url::Url::parse(&base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("ticket", ticket);
            url.to_string()
        }
        Err(_) => format!("{}?ticket={}", base, ticket),
    }
}

fn map_lookup(err: ArtifactError) -> TicketError {
    match err {
        ArtifactError::NotFound => TicketError::NotFound,
        other => {
            tracing::error!(error = ?other, "ticket lookup failed");
            TicketError::NotFound
        }
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

    fn manager() -> TicketManager {
        TicketManager::new(
            EncryptedArtifacts::new(
                Arc::new(MemoryAuthStorage::new()),
                CryptoBox::from_secret("ticket-secret"),
                ArtifactKind::Ticket,
                Duration::days(1),
            ),
            Duration::days(7),
        )
    }

    fn client() -> ClientInformation {
        ClientInformation {
            client_id: "client-1".to_string(),
            client_name: "Example App".to_string(),
        }
    }

    #[test]
    fn test_action_routes() {
        for action in [
            TicketAction::VerifyEmail,
            TicketAction::PasswordResetEmail,
            TicketAction::BlockedAccountEmail,
        ] {
            assert_eq!(TicketAction::from_route(action.route()), Some(action));
        }
        assert_eq!(TicketAction::from_route("delete-account"), None);
        assert_eq!(
            serde_json::to_string(&TicketAction::BlockedAccountEmail).unwrap(),
            "\"BLOCKED_ACCOUNT_EMAIL\""
        );
    }

    #[test]
    fn test_action_url() {
        assert_eq!(
            action_url("https://auth.example.com/", TicketAction::VerifyEmail, "abc_-1"),
            "https://auth.example.com/tickets/verify-email?ticket=abc_-1"
        );
    }

    #[tokio::test]
    async fn test_resolve_and_consume() {
        let tickets = manager();
        let ticket = tickets
            .issue(
                "user-1",
                client(),
                TicketAction::VerifyEmail,
                "10.0.0.1",
                Duration::hours(1),
            )
            .await
            .unwrap();

        let resolved = tickets.resolve(&ticket).await.unwrap();
        assert_eq!(resolved.payload.user_id, "user-1");
        assert_eq!(resolved.payload.context.request_ip, "10.0.0.1");

        tickets.consume(&ticket).await.unwrap();
        assert_eq!(
            tickets.resolve(&ticket).await.err(),
            Some(TicketError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_expired_is_distinct_from_missing() {
        let tickets = manager();
        let ticket = tickets
            .issue(
                "user-1",
                client(),
                TicketAction::PasswordResetEmail,
                "10.0.0.1",
                Duration::seconds(-1),
            )
            .await
            .unwrap();

        assert_eq!(
            tickets.resolve(&ticket).await.err(),
            Some(TicketError::Expired)
        );
        assert_eq!(
            tickets.claim(&ticket).await.err(),
            Some(TicketError::Expired)
        );
        assert_eq!(
            tickets.resolve("garbage").await.err(),
            Some(TicketError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let tickets = manager();
        let ticket = tickets
            .issue(
                "user-1",
                client(),
                TicketAction::BlockedAccountEmail,
                "10.0.0.1",
                Duration::hours(1),
            )
            .await
            .unwrap();

        let results = join_all((0..8).map(|_| tickets.claim(&ticket))).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == TicketError::NotFound)
        );
    }
}
