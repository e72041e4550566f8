//! Fixed JWT claim sets, one builder per grant type.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Input to the access token builder, tagged by grant type
#[derive(Debug, Clone, PartialEq)]
pub enum GrantClaims {
    AuthorizationCode {
        user_id: String,
        client_id: String,
        scope: String,
        audience: Option<String>,
        session_id: String,
    },
    RefreshToken {
        user_id: String,
        client_id: String,
        scope: String,
        audience: Option<String>,
        session_id: Option<String>,
    },
    ClientCredentials {
        client_id: String,
        scope: String,
        audience: Option<String>,
    },
}

impl GrantClaims {
    pub fn client_id(&self) -> &str {
        match self {
            GrantClaims::AuthorizationCode { client_id, .. }
            | GrantClaims::RefreshToken { client_id, .. }
            | GrantClaims::ClientCredentials { client_id, .. } => client_id,
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            GrantClaims::AuthorizationCode { scope, .. }
            | GrantClaims::RefreshToken { scope, .. }
            | GrantClaims::ClientCredentials { scope, .. } => scope,
        }
    }

    /// Requested audience; the issuer stands in when absent
    pub fn audience(&self) -> Option<&str> {
        match self {
            GrantClaims::AuthorizationCode { audience, .. }
            | GrantClaims::RefreshToken { audience, .. }
            | GrantClaims::ClientCredentials { audience, .. } => audience.as_deref(),
        }
    }

    /// End user behind the grant; `None` for client_credentials
    pub fn user_id(&self) -> Option<&str> {
        match self {
            GrantClaims::AuthorizationCode { user_id, .. }
            | GrantClaims::RefreshToken { user_id, .. } => Some(user_id),
            GrantClaims::ClientCredentials { .. } => None,
        }
    }

    /// Build the access token claims
    pub fn access_claims(
        &self,
        issuer: &str,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> AccessTokenClaims {
        let (sub, sid) = match self {
            GrantClaims::AuthorizationCode {
                user_id,
                session_id,
                ..
            } => (user_id.clone(), Some(session_id.clone())),
            GrantClaims::RefreshToken {
                user_id,
                session_id,
                ..
            } => (user_id.clone(), session_id.clone()),
            GrantClaims::ClientCredentials { client_id, .. } => (client_id.clone(), None),
        };

        let audience = self.audience().unwrap_or(issuer);
        AccessTokenClaims {
            iss: issuer.to_string(),
            sub,
            azp: self.client_id().to_string(),
            scope: self.scope().to_string(),
            aud: vec![audience.to_string(), format!("{}/userinfo", audience)],
            iat: issued_at.timestamp(),
            exp: (issued_at + lifetime).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            sid,
        }
    }
}

/// Access token claim set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub azp: String,
    pub scope: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<String>,
}

impl AccessTokenClaims {
    /// Whether the token may be presented at the userinfo endpoint
    pub fn allows_userinfo(&self) -> bool {
        self.aud.iter().any(|aud| aud.ends_with("/userinfo"))
    }
}

/// id_token claim set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email_verified: Option<bool>,
}
