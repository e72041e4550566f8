//! Storage trait definitions for artifacts, rate-limit counters and directories.
//!
//! Defines async storage interfaces that the in-memory and PostgreSQL
//! backends implement. Artifact payloads reach the store already sealed.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, StorageError>;

// ===== Artifact Storage =====

/// Namespace of an encrypted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    State,
    AuthorizationCode,
    RefreshToken,
    Ticket,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::State => "state",
            ArtifactKind::AuthorizationCode => "authorization_code",
            ArtifactKind::RefreshToken => "refresh_token",
            ArtifactKind::Ticket => "ticket",
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "state" => Ok(ArtifactKind::State),
            "authorization_code" => Ok(ArtifactKind::AuthorizationCode),
            "refresh_token" => Ok(ArtifactKind::RefreshToken),
            "ticket" => Ok(ArtifactKind::Ticket),
            other => Err(StorageError::InvalidData(format!(
                "Unknown artifact kind: {}",
                other
            ))),
        }
    }
}

/// Artifact as handed to the store for insertion
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub kind: ArtifactKind,
    /// Sealed payload
    pub payload: String,
    pub session_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Persisted artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Store-assigned raw id; never leaves the manager layer unsealed
    pub id: String,
    pub kind: ArtifactKind,
    /// Sealed payload
    pub payload: String,
    pub consumed: bool,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Generic store shared by every artifact kind
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist a new artifact under a fresh store-assigned id
    async fn create_artifact(&self, artifact: NewArtifact) -> Result<ArtifactRecord>;

    /// Load a live artifact, consumed or not
    async fn find_artifact(&self, kind: ArtifactKind, id: &str) -> Result<Option<ArtifactRecord>>;

    /// Atomically flip `consumed` from false to true on a live artifact.
    /// Returns the record only to the single caller that performed the transition.
    async fn lock_artifact(&self, kind: ArtifactKind, id: &str) -> Result<Option<ArtifactRecord>>;

    /// Delete an artifact; deleting a missing artifact is not an error
    async fn delete_artifact(&self, kind: ArtifactKind, id: &str) -> Result<()>;

    /// Delete every artifact of `kind` issued under a session
    async fn delete_artifacts_by_session(&self, kind: ArtifactKind, session_id: &str)
    -> Result<usize>;

    /// Remove expired artifacts of every kind
    async fn cleanup_expired_artifacts(&self) -> Result<usize>;
}

// ===== Rate Limit Storage =====

/// Point counter for one rate-limit key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub key: String,
    pub points: u32,
    pub window_start: DateTime<Utc>,
}

/// Storage for point-bucket counters
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically add `points` to the counter at `key`, starting a new window
    /// when the previous one has elapsed. The stored value never exceeds
    /// `limit + points`.
    async fn consume_points(
        &self,
        key: &str,
        points: u32,
        limit: u32,
        window: chrono::Duration,
    ) -> Result<RateLimitCounter>;

    /// Read a counter without consuming
    async fn get_counter(&self, key: &str) -> Result<Option<RateLimitCounter>>;

    /// Drop a counter
    async fn reset_counter(&self, key: &str) -> Result<()>;

    /// Remove counters whose window started before `older_than`
    async fn cleanup_counters(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

// ===== Directory Storage =====

/// Client application directory
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn store_client(&self, client: &Client) -> Result<()>;

    async fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<Client>>;
}

/// Resource server directory
#[async_trait]
pub trait ApiStore: Send + Sync {
    async fn store_api(&self, api: &ApiRecord) -> Result<()>;

    async fn find_api_by_audience(&self, audience: &str) -> Result<Option<ApiRecord>>;
}

/// User directory
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn store_user(&self, user: &User) -> Result<()>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Add `ip` to the user's blocked set
    async fn block_ip_for_user(&self, user_id: &str, ip: &str) -> Result<()>;

    /// Remove `ip` from the user's blocked set
    async fn unblock_ip_for_user(&self, user_id: &str, ip: &str) -> Result<()>;

    async fn increment_login_count(&self, user_id: &str) -> Result<()>;

    async fn mark_email_verified(&self, user_id: &str) -> Result<()>;

    /// Replace the password hash and the retained history
    async fn update_password(
        &self,
        user_id: &str,
        password_hash: &str,
        password_history: &[String],
    ) -> Result<()>;
}

/// Audit event sink
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record_event(&self, event: &AuditEvent) -> Result<()>;

    async fn list_events(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>>;
}

/// Server-side session records keyed by the session cookie
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session that has not expired
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Insert or replace a session, pushing its expiry to `expires_at`
    async fn save_session(&self, session: &SessionRecord, expires_at: DateTime<Utc>)
    -> Result<()>;

    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    /// Delete every expired session, returning how many were removed
    async fn cleanup_expired_sessions(&self) -> Result<usize>;
}

/// Combined storage trait
pub trait AuthStorage:
    ArtifactStore + RateLimitStore + ClientStore + ApiStore + UserStore + EventStore + Send + Sync
{
}

impl<T> AuthStorage for T where
    T: ArtifactStore + RateLimitStore + ClientStore + ApiStore + UserStore + EventStore + Send + Sync
{
}
