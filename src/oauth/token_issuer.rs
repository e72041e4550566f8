//! Token minting for every grant type.
//!
//! The issuer only signs and, for offline access, asks the
//! [`RefreshTokenManager`] for a new refresh token. Artifact consumption
//! happens before it is called.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::errors::OAuthError;
use crate::oauth::claims::{GrantClaims, IdTokenClaims};
use crate::oauth::refresh_token::{RefreshTokenManager, RefreshTokenPayload};
use crate::oauth::signing::SigningKey;
use crate::oauth::types::{Client, TokenResponse, scope_contains};
use crate::storage::traits::{ApiStore, UserStore};

/// Lifetimes used when no API or client policy applies
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access_token: Duration,
    pub id_token: Duration,
}

#[derive(Clone)]
pub struct TokenIssuer {
    issuer: String,
    signing_key: Arc<SigningKey>,
    apis: Arc<dyn ApiStore>,
    users: Arc<dyn UserStore>,
    refresh_tokens: RefreshTokenManager,
    lifetimes: TokenLifetimes,
}

impl TokenIssuer {
    pub fn new(
        issuer: String,
        signing_key: Arc<SigningKey>,
        apis: Arc<dyn ApiStore>,
        users: Arc<dyn UserStore>,
        refresh_tokens: RefreshTokenManager,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            issuer,
            signing_key,
            apis,
            users,
            refresh_tokens,
            lifetimes,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Access token lifetime for an audience: the API record's
    /// `token_expiry`, else the configured default
    pub async fn access_token_lifetime(&self, audience: Option<&str>) -> Result<Duration, OAuthError> {
        let Some(audience) = audience else {
            return Ok(self.lifetimes.access_token);
        };
        let api = self
            .apis
            .find_api_by_audience(audience)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;
        Ok(api
            .filter(|api| api.token_expiry > 0)
            .map(|api| Duration::seconds(api.token_expiry))
            .unwrap_or(self.lifetimes.access_token))
    }

    /// Mint the token response for a grant that has already been authorized.
    ///
    /// `callback_url` is bound into a new refresh token when one is issued.
    pub async fn issue(
        &self,
        grant: &GrantClaims,
        client: &Client,
        callback_url: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let now = Utc::now();
        let lifetime = self.access_token_lifetime(grant.audience()).await?;

        let access_claims = grant.access_claims(&self.issuer, now, lifetime);
        let access_token = self
            .signing_key
            .sign(&access_claims)
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        let mut response = TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            id_token: None,
            refresh_token: None,
            expires_in: lifetime.num_seconds(),
        };

        let Some(user_id) = grant.user_id() else {
            return Ok(response);
        };

        if scope_contains(grant.scope(), "openid") {
            response.id_token = Some(self.id_token(grant, client, user_id, access_claims.sid).await?);
        }

        if scope_contains(grant.scope(), "offline_access") {
            response.refresh_token = Some(self.refresh_token(grant, client, user_id, callback_url).await?);
        }

        tracing::debug!(
            client_id = %client.client_id,
            user_id = %user_id,
            id_token = response.id_token.is_some(),
            refresh_token = response.refresh_token.is_some(),
            "issued tokens"
        );
        Ok(response)
    }

    async fn id_token(
        &self,
        grant: &GrantClaims,
        client: &Client,
        user_id: &str,
        sid: Option<String>,
    ) -> Result<String, OAuthError> {
        let now = Utc::now();
        let lifetime = if client.id_token_expiry > 0 {
            Duration::seconds(client.id_token_expiry)
        } else {
            self.lifetimes.id_token
        };

        let mut claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            aud: client.client_id.clone(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            sid,
            email: None,
            email_verified: None,
        };

        if grant.audience().is_some() {
            let user = self
                .users
                .find_user_by_id(user_id)
                .await
                .map_err(|e| OAuthError::ServerError(e.to_string()))?;
            if let Some(user) = user {
                claims.email = Some(user.email);
                claims.email_verified = Some(user.email_verified);
            }
        }

        self.signing_key
            .sign(&claims)
            .map_err(|e| OAuthError::ServerError(e.to_string()))
    }

    async fn refresh_token(
        &self,
        grant: &GrantClaims,
        client: &Client,
        user_id: &str,
        callback_url: &str,
    ) -> Result<String, OAuthError> {
        let session_id = match grant {
            GrantClaims::AuthorizationCode { session_id, .. } => session_id.clone(),
            GrantClaims::RefreshToken { session_id, .. } => session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            GrantClaims::ClientCredentials { .. } => {
                return Err(OAuthError::ServerError(
                    "refresh token requested for client_credentials".to_string(),
                ));
            }
        };

        let ttl = (client.refresh_token_expiry > 0)
            .then(|| Duration::seconds(client.refresh_token_expiry));

        let payload = RefreshTokenPayload {
            client_id: client.client_id.clone(),
            user_id: user_id.to_string(),
            callback_url: callback_url.to_string(),
            scope: grant.scope().to_string(),
            audience: grant.audience().map(str::to_string),
        };

        self.refresh_tokens
            .issue(payload, &session_id, ttl)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))
    }
}
