//! Core types shared by the credential engine, the stores and the HTTP layer.
//!
//! Defines grant types, directory records (clients, APIs, users), the session
//! record, audit events and the token response shape.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

/// Grant types accepted at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(other.to_string()),
        }
    }
}

/// Response types accepted at the authorize endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
}

/// Kind of application registered for a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    Spa,
    Native,
    RegularWeb,
    MachineToMachine,
}

/// Registered client application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    /// Absent for public clients
    pub client_secret: Option<String>,
    pub client_name: String,
    pub application_type: ApplicationType,
    pub allowed_callback_urls: Vec<String>,
    pub allowed_logout_urls: Vec<String>,
    pub grant_types: Vec<GrantType>,
    /// id_token lifetime in seconds; 0 falls back to the server default
    pub id_token_expiry: i64,
    /// Refresh token lifetime in seconds; 0 falls back to the server default
    pub refresh_token_expiry: i64,
    pub scopes: Vec<String>,
    /// Default audience for client_credentials
    pub audience: Option<String>,
}

impl Client {
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    pub fn allows_callback(&self, callback_url: &str) -> bool {
        self.allowed_callback_urls.iter().any(|url| url == callback_url)
    }

    pub fn allows_logout(&self, logout_url: &str) -> bool {
        self.allowed_logout_urls.iter().any(|url| url == logout_url)
    }
}

/// Registered resource server (audience)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRecord {
    pub name: String,
    /// Audience identifier placed in the access token `aud`
    pub identifier: String,
    /// Access token lifetime in seconds
    pub token_expiry: i64,
    pub token_signing_alg: String,
    pub permissions: Vec<String>,
}

/// End user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub password_hash: String,
    /// Previous hashes, oldest first, current password excluded
    pub password_history: Vec<String>,
    /// Addresses blocked after repeated failed logins
    pub blocked_for: BTreeSet<String>,
    pub login_count: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    pub fn is_blocked_for(&self, ip: &str) -> bool {
        self.blocked_for.contains(ip)
    }
}

/// Server-side record behind the session cookie
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub client_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub is_authenticated: bool,
    pub scope: Option<String>,
    /// Last code issued under this session, kept for audit
    pub authorization_code: Option<String>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    /// Authenticated for this client from this address
    pub fn is_authenticated_for(&self, client_id: &str, client_ip: &str) -> bool {
        self.is_authenticated
            && self.user_id.is_some()
            && self.client_id.as_deref() == Some(client_id)
            && self.client_ip.as_deref() == Some(client_ip)
    }
}

/// Security audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SuccessLogin,
    FailedLogin,
    SuccessCodeExchange,
    FailedCodeExchange,
    SuccessRefreshTokenExchange,
    FailedRefreshTokenExchange,
    SuccessBlockedAccountEmailSent,
    SuccessVerificationEmailSent,
    SuccessChangePasswordRequest,
    SuccessChangePassword,
    SuccessUnblockAccount,
    SuccessVerifyEmail,
    SuccessLogout,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SuccessLogin => "success_login",
            EventType::FailedLogin => "failed_login",
            EventType::SuccessCodeExchange => "success_code_exchange",
            EventType::FailedCodeExchange => "failed_code_exchange",
            EventType::SuccessRefreshTokenExchange => "success_refresh_token_exchange",
            EventType::FailedRefreshTokenExchange => "failed_refresh_token_exchange",
            EventType::SuccessBlockedAccountEmailSent => "success_blocked_account_email_sent",
            EventType::SuccessVerificationEmailSent => "success_verification_email_sent",
            EventType::SuccessChangePasswordRequest => "success_change_password_request",
            EventType::SuccessChangePassword => "success_change_password",
            EventType::SuccessUnblockAccount => "success_unblock_account",
            EventType::SuccessVerifyEmail => "success_verify_email",
            EventType::SuccessLogout => "success_logout",
        }
    }
}

/// Persisted audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: EventType, description: &str) -> Self {
        Self {
            event_type,
            client_id: None,
            client_name: None,
            ip: None,
            user_agent: None,
            user_id: None,
            email: None,
            description: description.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_client(mut self, client: &Client) -> Self {
        self.client_id = Some(client.client_id.clone());
        self.client_name = Some(client.client_name.clone());
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    pub fn with_user(mut self, user: &User) -> Self {
        self.user_id = Some(user.id.clone());
        self.email = Some(user.email.clone());
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.map(str::to_string);
        self
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

/// Generate a random URL-safe secret
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Parse a space-separated scope string
pub fn parse_scope(scope: &str) -> HashSet<String> {
    scope.split_whitespace().map(|s| s.to_string()).collect()
}

/// Join scopes into a space-separated string
pub fn join_scopes(scopes: &HashSet<String>) -> String {
    let mut scopes: Vec<_> = scopes.iter().collect();
    scopes.sort();
    scopes.into_iter().cloned().collect::<Vec<_>>().join(" ")
}

/// Whether a space-separated scope string grants `wanted`
pub fn scope_contains(scope: &str, wanted: &str) -> bool {
    scope.split_whitespace().any(|s| s == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_type_parsing() {
        assert_eq!(
            "authorization_code".parse::<GrantType>(),
            Ok(GrantType::AuthorizationCode)
        );
        assert_eq!(
            "refresh_token".parse::<GrantType>(),
            Ok(GrantType::RefreshToken)
        );
        assert_eq!("password".parse::<GrantType>(), Err("password".to_string()));
    }

    #[test]
    fn test_scope_helpers() {
        let scopes = parse_scope("openid  offline_access profile");
        assert_eq!(join_scopes(&scopes), "offline_access openid profile");
        assert!(scope_contains("openid offline_access", "offline_access"));
        assert!(!scope_contains("openid offline_accessx", "offline_access"));
    }

    #[test]
    fn test_session_authenticated_for() {
        let mut session = SessionRecord::new();
        assert!(!session.is_authenticated_for("client-1", "10.0.0.1"));

        session.is_authenticated = true;
        session.user_id = Some("user-1".to_string());
        session.client_id = Some("client-1".to_string());
        session.client_ip = Some("10.0.0.1".to_string());
        assert!(session.is_authenticated_for("client-1", "10.0.0.1"));
        assert!(!session.is_authenticated_for("client-1", "10.0.0.2"));
        assert!(!session.is_authenticated_for("client-2", "10.0.0.1"));
    }

    #[test]
    fn test_generate_token_is_unique() {
        let first = generate_token();
        let second = generate_token();
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
    }
}
