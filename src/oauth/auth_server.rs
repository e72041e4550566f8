//! Authorization server facade: authorize, token, userinfo and logout.
//!
//! Login and the account flows live in [`crate::oauth::account`]; both
//! operate on the same [`AuthorizationServer`].

use base64::{Engine, prelude::*};
use chrono::Duration;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::config::{ArtifactLifetimes, ArtifactSecrets, Config, RateLimitConfig};
use crate::errors::{OAuthError, UserInfoError};
use crate::oauth::artifacts::EncryptedArtifacts;
use crate::oauth::authorization_code::{AuthorizationCodeManager, AuthorizationCodePayload};
use crate::oauth::claims::{AccessTokenClaims, GrantClaims};
use crate::oauth::crypto::{CryptoBox, secure_eq};
use crate::oauth::lockout::LockoutPolicy;
use crate::oauth::notifications::EmailSender;
use crate::oauth::password::PasswordService;
use crate::oauth::rate_limit::{RateLimitAxis, RateLimitDecision, RateLimiter};
use crate::oauth::refresh_token::RefreshTokenManager;
use crate::oauth::signing::SigningKey;
use crate::oauth::state::{StateManager, StatePayload};
use crate::oauth::ticket::TicketManager;
use crate::oauth::token_issuer::{TokenIssuer, TokenLifetimes};
use crate::oauth::types::{AuditEvent, Client, EventType, GrantType, SessionRecord, TokenResponse, User};
use crate::storage::Stores;
use crate::storage::traits::{ApiStore, ArtifactKind, ClientStore, EventStore, SessionStore, UserStore};

/// Everything the facade needs from configuration
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// Public base URL, used as `iss`
    pub issuer: String,
    pub secrets: ArtifactSecrets,
    pub lifetimes: ArtifactLifetimes,
    pub rate_limits: RateLimitConfig,
    pub tokens: TokenLifetimes,
}

impl ServerSettings {
    /// Settings with default lifetimes and budgets
    pub fn new(issuer: &str, secrets: ArtifactSecrets) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            secrets,
            lifetimes: ArtifactLifetimes::default(),
            rate_limits: RateLimitConfig::default(),
            tokens: TokenLifetimes {
                access_token: Duration::seconds(86400),
                id_token: Duration::seconds(36000),
            },
        }
    }
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        Self {
            issuer: config.external_base.clone(),
            secrets: config.secrets.clone(),
            lifetimes: config.lifetimes.clone(),
            rate_limits: config.rate_limits.clone(),
            tokens: TokenLifetimes {
                access_token: *config.access_token_expiry.as_ref(),
                id_token: *config.id_token_expiry.as_ref(),
            },
        }
    }
}

/// Caller context recorded on audit events
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip: &str, user_agent: Option<&str>) -> Self {
        Self {
            ip: ip.to_string(),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

/// Authorization server over the artifact managers and directories
#[derive(Clone)]
pub struct AuthorizationServer {
    pub(crate) clients: Arc<dyn ClientStore>,
    pub(crate) users: Arc<dyn UserStore>,
    pub(crate) events: Arc<dyn EventStore>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) passwords: Arc<dyn PasswordService>,
    pub(crate) emails: Arc<dyn EmailSender>,
    pub(crate) states: StateManager,
    pub(crate) codes: AuthorizationCodeManager,
    pub(crate) refresh_tokens: RefreshTokenManager,
    pub(crate) tickets: TicketManager,
    pub(crate) token_issuer: TokenIssuer,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) lockout: LockoutPolicy,
    pub(crate) stores: Stores,
    pub(crate) settings: ServerSettings,
}

impl AuthorizationServer {
    pub fn new(
        stores: Stores,
        signing_key: Arc<SigningKey>,
        passwords: Arc<dyn PasswordService>,
        emails: Arc<dyn EmailSender>,
        settings: ServerSettings,
    ) -> Self {
        let lifetimes = &settings.lifetimes;
        let secrets = &settings.secrets;

        let states = StateManager::new(
            EncryptedArtifacts::new(
                stores.artifacts.clone(),
                CryptoBox::new(&secrets.state),
                ArtifactKind::State,
                *lifetimes.state.as_ref(),
            ),
            *lifetimes.state_stale_after.as_ref(),
        );
        let codes = AuthorizationCodeManager::new(EncryptedArtifacts::new(
            stores.artifacts.clone(),
            CryptoBox::new(&secrets.authorization_code),
            ArtifactKind::AuthorizationCode,
            *lifetimes.authorization_code.as_ref(),
        ));
        let refresh_tokens = RefreshTokenManager::new(EncryptedArtifacts::new(
            stores.artifacts.clone(),
            CryptoBox::new(&secrets.refresh_token),
            ArtifactKind::RefreshToken,
            *lifetimes.refresh_token.as_ref(),
        ));
        let tickets = TicketManager::new(
            EncryptedArtifacts::new(
                stores.artifacts.clone(),
                CryptoBox::new(&secrets.ticket),
                ArtifactKind::Ticket,
                *lifetimes.verify_email.as_ref(),
            ),
            *lifetimes.ticket_retention.as_ref(),
        );

        let token_issuer = TokenIssuer::new(
            settings.issuer.clone(),
            signing_key,
            stores.apis.clone(),
            stores.users.clone(),
            refresh_tokens.clone(),
            settings.tokens,
        );
        let rate_limiter = RateLimiter::new(stores.rate_limits.clone(), settings.rate_limits.clone());
        let lockout = LockoutPolicy::new(
            stores.users.clone(),
            stores.events.clone(),
            rate_limiter.clone(),
            tickets.clone(),
            emails.clone(),
            settings.issuer.clone(),
            *lifetimes.unblock_account.as_ref(),
        );

        Self {
            clients: stores.clients.clone(),
            users: stores.users.clone(),
            events: stores.events.clone(),
            sessions: stores.sessions.clone(),
            passwords,
            emails,
            states,
            codes,
            refresh_tokens,
            tickets,
            token_issuer,
            rate_limiter,
            lockout,
            stores,
            settings,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.settings.issuer
    }

    pub fn signing_key(&self) -> &SigningKey {
        self.token_issuer.signing_key()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Load the session behind a cookie, or start a fresh one
    pub async fn load_session(&self, session_id: Option<&str>) -> SessionRecord {
        let Some(session_id) = session_id else {
            return SessionRecord::new();
        };
        match self.sessions.load_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => SessionRecord::new(),
            Err(err) => {
                tracing::error!(error = ?err, "unable to load session");
                SessionRecord::new()
            }
        }
    }

    pub(crate) async fn record(&self, event: AuditEvent) {
        if let Err(err) = self.events.record_event(&event).await {
            tracing::error!(error = ?err, event_type = event.event_type.as_str(), "unable to record audit event");
        }
    }

    /// Handle authorization requests.
    ///
    /// A session that already authenticated this client from the same address
    /// receives a code directly. Anyone else is sent to the login page with a
    /// fresh state.
    pub async fn authorize(
        &self,
        request: AuthorizeRequest,
        session: &SessionRecord,
        context: &RequestContext,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        if request.response_type.as_deref() != Some("code") {
            return Err(OAuthError::UnsupportedResponseType(
                request.response_type.unwrap_or_default(),
            ));
        }

        let client = self
            .clients
            .get_client_by_client_id(&request.client_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        if !client.allows_callback(&request.redirect_uri) {
            return Err(OAuthError::InvalidClient(
                "Callback URL mismatch".to_string(),
            ));
        }

        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OAuthError::InvalidClient(
                "Grant type not allowed".to_string(),
            ));
        }

        let audience = request.audience.filter(|v| !v.is_empty());
        if let Some(audience) = audience.as_deref() {
            let api = self
                .stores
                .apis
                .find_api_by_audience(audience)
                .await
                .map_err(|e| OAuthError::ServerError(e.to_string()))?;
            if api.is_none() {
                tracing::debug!(client_id = %client.client_id, "authorize for unknown audience");
                return Err(OAuthError::InvalidRequest("Invalid audience".to_string()));
            }
        }

        let scope = request.scope.unwrap_or_default();

        if session.is_authenticated_for(&client.client_id, &context.ip) {
            if let Some(user_id) = session.user_id.clone() {
                let code = self
                    .codes
                    .issue(AuthorizationCodePayload {
                        user_id,
                        client_id: client.client_id.clone(),
                        code_challenge: request.code_challenge,
                        code_challenge_method: request.code_challenge_method,
                        callback_url: request.redirect_uri.clone(),
                        scope,
                        audience: audience.clone(),
                        session_id: session.session_id.clone(),
                    })
                    .await
                    .map_err(|e| OAuthError::ServerError(e.to_string()))?;

                tracing::debug!(client_id = %client.client_id, "authorized from existing session");
                let redirect = callback_url(&request.redirect_uri, &code, request.state.as_deref())?;
                return Ok(AuthorizeOutcome::Callback(redirect));
            }
        }

        let state = self
            .states
            .issue(StatePayload {
                client_id: client.client_id.clone(),
                client_state: request.state,
                callback_url: request.redirect_uri,
                scope,
                audience,
                code_challenge: request.code_challenge,
                code_challenge_method: request.code_challenge_method,
            })
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        let mut login = Url::parse(&format!("{}/login", self.settings.issuer))
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;
        login
            .query_pairs_mut()
            .append_pair("client_id", &client.client_id)
            .append_pair("state", &state);

        Ok(AuthorizeOutcome::Login(login.to_string()))
    }

    /// Handle token requests
    pub async fn token(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
        context: &RequestContext,
    ) -> Result<TokenResponse, OAuthError> {
        match request.grant_type {
            GrantType::AuthorizationCode => {
                self.handle_authorization_code_grant(request, client_auth, context)
                    .await
            }
            GrantType::ClientCredentials => {
                self.handle_client_credentials_grant(request, client_auth, context)
                    .await
            }
            GrantType::RefreshToken => {
                self.handle_refresh_token_grant(request, client_auth, context)
                    .await
            }
        }
    }

    async fn handle_authorization_code_grant(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
        context: &RequestContext,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = GrantType::AuthorizationCode;
        let client_id = requested_client_id(&request, client_auth.as_ref())?;
        let code = request
            .code
            .clone()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing authorization code".to_string()))?;
        let redirect_uri = request.redirect_uri.clone().unwrap_or_default();

        let Some(client) = self
            .authenticate_client(&client_id, grant_type, client_auth.as_ref(), &request)
            .await?
        else {
            return Err(self.reject(grant_type, &client_id, context).await);
        };

        let payload = match self
            .codes
            .verify_and_consume(
                &code,
                &client.client_id,
                &redirect_uri,
                request.code_verifier.as_deref(),
            )
            .await
        {
            Ok(payload) => payload,
            Err(_) => return Err(self.reject(grant_type, &client_id, context).await),
        };

        let Some(user) = self.find_user(&payload.user_id).await? else {
            return Err(self.reject(grant_type, &client_id, context).await);
        };

        let grant = GrantClaims::AuthorizationCode {
            user_id: user.id.clone(),
            client_id: client.client_id.clone(),
            scope: payload.scope,
            audience: payload.audience,
            session_id: payload.session_id,
        };
        let response = self
            .token_issuer
            .issue(&grant, &client, &payload.callback_url)
            .await?;

        if let Err(err) = self.codes.delete(&code).await {
            tracing::warn!(error = ?err, client_id = %client.client_id, "unable to delete exchanged code");
        }

        self.record(
            AuditEvent::new(EventType::SuccessCodeExchange, "Authorization code exchanged")
                .with_client(&client)
                .with_user(&user)
                .with_ip(&context.ip)
                .with_user_agent(context.user_agent.as_deref()),
        )
        .await;
        Ok(response)
    }

    async fn handle_refresh_token_grant(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
        context: &RequestContext,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = GrantType::RefreshToken;
        let client_id = requested_client_id(&request, client_auth.as_ref())?;
        let refresh_token = request
            .refresh_token
            .clone()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing refresh token".to_string()))?;

        let Some(client) = self
            .authenticate_client(&client_id, grant_type, client_auth.as_ref(), &request)
            .await?
        else {
            return Err(self.reject(grant_type, &client_id, context).await);
        };

        let consumed = match self
            .refresh_tokens
            .consume_and_rotate(
                &refresh_token,
                &client.client_id,
                request.redirect_uri.as_deref().unwrap_or_default(),
            )
            .await
        {
            Ok(consumed) => consumed,
            Err(_) => return Err(self.reject(grant_type, &client_id, context).await),
        };

        let Some(user) = self.find_user(&consumed.payload.user_id).await? else {
            return Err(self.reject(grant_type, &client_id, context).await);
        };

        let grant = GrantClaims::RefreshToken {
            user_id: user.id.clone(),
            client_id: client.client_id.clone(),
            scope: consumed.payload.scope,
            audience: consumed.payload.audience,
            session_id: consumed.session_id,
        };
        let response = self
            .token_issuer
            .issue(&grant, &client, &consumed.payload.callback_url)
            .await?;

        if let Err(err) = self.refresh_tokens.delete(&refresh_token).await {
            tracing::warn!(error = ?err, client_id = %client.client_id, "unable to delete rotated refresh token");
        }

        self.record(
            AuditEvent::new(
                EventType::SuccessRefreshTokenExchange,
                "Refresh token exchanged",
            )
            .with_client(&client)
            .with_user(&user)
            .with_ip(&context.ip)
            .with_user_agent(context.user_agent.as_deref()),
        )
        .await;
        Ok(response)
    }

    async fn handle_client_credentials_grant(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
        context: &RequestContext,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = GrantType::ClientCredentials;
        let client_id = requested_client_id(&request, client_auth.as_ref())?;

        let Some(client) = self
            .authenticate_client(&client_id, grant_type, client_auth.as_ref(), &request)
            .await?
        else {
            return Err(self.reject(grant_type, &client_id, context).await);
        };

        // A client registered for one API cannot ask for another
        let audience = match (request.audience.as_deref(), client.audience.as_deref()) {
            (Some(requested), Some(registered)) if requested != registered => {
                tracing::debug!(client_id = %client.client_id, "audience outside client registration");
                return Err(self.reject(grant_type, &client_id, context).await);
            }
            (Some(requested), _) => requested.to_string(),
            (None, Some(registered)) => registered.to_string(),
            (None, None) => return Err(self.reject(grant_type, &client_id, context).await),
        };

        let api = self
            .stores
            .apis
            .find_api_by_audience(&audience)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;
        let Some(api) = api else {
            return Err(self.reject(grant_type, &client_id, context).await);
        };

        let grant = GrantClaims::ClientCredentials {
            client_id: client.client_id.clone(),
            scope: api.permissions.join(" "),
            audience: Some(api.identifier),
        };
        let response = self.token_issuer.issue(&grant, &client, "").await?;

        tracing::info!(client_id = %client.client_id, "issued client credentials token");
        Ok(response)
    }

    /// Resolve and authenticate the client behind a token request.
    ///
    /// `Ok(None)` means the client must be rejected; the reason is only logged.
    async fn authenticate_client(
        &self,
        client_id: &str,
        grant_type: GrantType,
        client_auth: Option<&ClientAuthentication>,
        request: &TokenRequest,
    ) -> Result<Option<Client>, OAuthError> {
        let Some(client) = self
            .clients
            .get_client_by_client_id(client_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?
        else {
            tracing::debug!(client_id = %client_id, "unknown client at token endpoint");
            return Ok(None);
        };

        if !client.allows_grant(grant_type) {
            tracing::debug!(client_id = %client_id, grant_type = grant_type.as_str(), "grant type not allowed");
            return Ok(None);
        }

        let provided_secret = client_auth
            .and_then(|auth| auth.client_secret.as_ref())
            .or(request.client_secret.as_ref());

        let secret_ok = match (&client.client_secret, provided_secret) {
            (Some(expected), Some(provided)) => secure_eq(expected, provided),
            (_, None) => grant_type != GrantType::ClientCredentials,
            (None, Some(_)) => false,
        };

        if !secret_ok {
            tracing::debug!(client_id = %client_id, "client authentication failed");
            return Ok(None);
        }
        Ok(Some(client))
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, OAuthError> {
        self.users
            .find_user_by_id(user_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))
    }

    /// Build the generic rejection for a grant type and record it
    async fn reject(
        &self,
        grant_type: GrantType,
        client_id: &str,
        context: &RequestContext,
    ) -> OAuthError {
        let message = unauthorized_message(grant_type);
        let event_type = match grant_type {
            GrantType::AuthorizationCode => Some(EventType::FailedCodeExchange),
            GrantType::RefreshToken => Some(EventType::FailedRefreshTokenExchange),
            GrantType::ClientCredentials => None,
        };

        tracing::info!(client_id = %client_id, grant_type = grant_type.as_str(), "token request rejected");
        if let Some(event_type) = event_type {
            self.record(
                AuditEvent::new(event_type, message)
                    .with_client_id(client_id)
                    .with_ip(&context.ip)
                    .with_user_agent(context.user_agent.as_deref()),
            )
            .await;
        }
        OAuthError::Unauthorized(message.to_string())
    }

    /// Resolve the profile behind a bearer access token
    pub async fn userinfo(
        &self,
        bearer: &str,
        context: &RequestContext,
    ) -> Result<(UserInfo, RateLimitDecision), UserInfoError> {
        let claims: AccessTokenClaims = self
            .signing_key()
            .verify(bearer)
            .map_err(|_| UserInfoError::InvalidToken)?;

        if claims.iss != self.settings.issuer || !claims.allows_userinfo() {
            return Err(UserInfoError::InvalidToken);
        }

        let session_key = claims.sid.as_deref().unwrap_or(&claims.sub);
        let decision = self
            .rate_limiter
            .consume(RateLimitAxis::UserInfo, &[session_key, &context.ip], 1)
            .await
            .map_err(|e| UserInfoError::Internal(e.to_string()))?;
        if decision.is_limit_reached {
            return Err(UserInfoError::RateLimited(decision));
        }

        let user = self
            .users
            .find_user_by_id(&claims.sub)
            .await
            .map_err(|e| UserInfoError::Internal(e.to_string()))?
            .ok_or(UserInfoError::InvalidToken)?;

        Ok((
            UserInfo {
                email: user.email,
                first_name: user.first_name.filter(|v| !v.is_empty()),
                last_name: user.last_name.filter(|v| !v.is_empty()),
            },
            decision,
        ))
    }

    /// End a session and revoke its refresh tokens. Returns the logout redirect.
    pub async fn logout(
        &self,
        client_id: &str,
        redirect_uri: &str,
        session: &SessionRecord,
        context: &RequestContext,
    ) -> Result<String, OAuthError> {
        let client = self
            .clients
            .get_client_by_client_id(client_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        if !client.allows_logout(redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "Logout URL not allowed".to_string(),
            ));
        }

        self.sessions
            .destroy_session(&session.session_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        match self.refresh_tokens.delete_by_session(&session.session_id).await {
            Ok(count) => tracing::debug!(client_id = %client_id, revoked = count, "revoked session refresh tokens"),
            Err(err) => tracing::error!(error = ?err, client_id = %client_id, "unable to revoke refresh tokens"),
        }

        let mut event = AuditEvent::new(EventType::SuccessLogout, "User logged out")
            .with_client(&client)
            .with_ip(&context.ip)
            .with_user_agent(context.user_agent.as_deref());
        event.user_id = session.user_id.clone();
        self.record(event).await;

        Ok(redirect_uri.to_string())
    }
}

/// Result of an authorization request
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizeOutcome {
    /// Redirect to the client callback carrying `code` and `state`
    Callback(String),
    /// Redirect to the login page carrying the sealed state
    Login(String),
}

impl AuthorizeOutcome {
    pub fn location(&self) -> &str {
        match self {
            AuthorizeOutcome::Callback(url) | AuthorizeOutcome::Login(url) => url,
        }
    }
}

/// Authorization request parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub audience: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Profile returned by the userinfo endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Client credentials extracted from the request
#[derive(Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Parsed token request
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub grant_type: GrantType,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub audience: Option<String>,
}

impl TokenRequest {
    pub fn new(grant_type: GrantType) -> Self {
        Self {
            grant_type,
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            scope: None,
            audience: None,
        }
    }
}

/// Form data for the token endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub audience: Option<String>,
}

impl TryFrom<TokenForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        let grant_type = form
            .grant_type
            .ok_or_else(|| OAuthError::InvalidRequest("Missing grant_type".to_string()))?;
        let grant_type = grant_type
            .parse::<GrantType>()
            .map_err(OAuthError::UnsupportedGrantType)?;

        Ok(Self {
            grant_type,
            code: form.code.filter(|v| !v.is_empty()),
            redirect_uri: form.redirect_uri,
            code_verifier: form.code_verifier.filter(|v| !v.is_empty()),
            refresh_token: form.refresh_token.filter(|v| !v.is_empty()),
            client_id: form.client_id.filter(|v| !v.is_empty()),
            client_secret: form.client_secret.filter(|v| !v.is_empty()),
            scope: form.scope,
            audience: form.audience.filter(|v| !v.is_empty()),
        })
    }
}

/// Extract client authentication from an HTTP Basic header or the form
pub fn extract_client_auth(headers: &HeaderMap, form: &TokenForm) -> Option<ClientAuthentication> {
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(encoded) = auth_str.strip_prefix("Basic ") {
                if let Ok(decoded) = BASE64_STANDARD.decode(encoded.trim()) {
                    if let Ok(credentials) = String::from_utf8(decoded) {
                        if let Some((client_id, client_secret)) = credentials.split_once(':') {
                            return Some(ClientAuthentication {
                                client_id: client_id.to_string(),
                                client_secret: Some(client_secret.to_string()),
                            });
                        }
                    }
                }
            }
        }
    }

    form.client_id
        .as_ref()
        .filter(|client_id| !client_id.is_empty())
        .map(|client_id| ClientAuthentication {
            client_id: client_id.clone(),
            client_secret: form.client_secret.clone().filter(|v| !v.is_empty()),
        })
}

/// Generic 403 message for a grant type
pub fn unauthorized_message(grant_type: GrantType) -> &'static str {
    match grant_type {
        GrantType::AuthorizationCode => "Invalid authorization code",
        GrantType::RefreshToken => "Invalid refresh token",
        GrantType::ClientCredentials => "Invalid client credentials",
    }
}

fn requested_client_id(
    request: &TokenRequest,
    client_auth: Option<&ClientAuthentication>,
) -> Result<String, OAuthError> {
    let from_auth = client_auth.map(|auth| auth.client_id.as_str());
    let from_form = request.client_id.as_deref();
    match (from_auth, from_form) {
        (Some(a), Some(f)) if a != f => Err(OAuthError::InvalidRequest(
            "client_id does not match client authentication".to_string(),
        )),
        (Some(id), _) | (None, Some(id)) => Ok(id.to_string()),
        (None, None) => Err(OAuthError::InvalidRequest("Missing client_id".to_string())),
    }
}

/// Client callback carrying a code and the client's own `state`
pub(crate) fn callback_url(
    callback: &str,
    code: &str,
    state: Option<&str>,
) -> Result<String, OAuthError> {
    let mut url = Url::parse(callback)
        .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect URI: {}", e)))?;
    url.query_pairs_mut().append_pair("code", code);
    if let Some(state) = state {
        url.query_pairs_mut().append_pair("state", state);
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactSecret;
    use crate::oauth::notifications::MemoryEmailSender;
    use crate::oauth::password::{Argon2PasswordService, hash_password};
    use crate::oauth::types::{ApiRecord, ApplicationType};
    use crate::storage::inmemory::MemoryAuthStorage;
    use std::collections::BTreeSet;

    const SIGNING_KEY_PEM: &str = include_str!("../../tests/fixtures/signing_key.pem");

    fn settings() -> ServerSettings {
        ServerSettings::new(
            "https://auth.example.com",
            ArtifactSecrets {
                state: ArtifactSecret::from("state-secret"),
                authorization_code: ArtifactSecret::from("code-secret"),
                refresh_token: ArtifactSecret::from("refresh-secret"),
                ticket: ArtifactSecret::from("ticket-secret"),
            },
        )
    }

    async fn server() -> (AuthorizationServer, Arc<MemoryAuthStorage>) {
        let storage = Arc::new(MemoryAuthStorage::new());
        storage
            .store_client(&Client {
                client_id: "client-1".to_string(),
                client_secret: Some("secret-1".to_string()),
                client_name: "Example App".to_string(),
                application_type: ApplicationType::RegularWeb,
                allowed_callback_urls: vec!["https://app.example.com/callback".to_string()],
                allowed_logout_urls: vec!["https://app.example.com/".to_string()],
                grant_types: vec![
                    GrantType::AuthorizationCode,
                    GrantType::RefreshToken,
                    GrantType::ClientCredentials,
                ],
                id_token_expiry: 0,
                refresh_token_expiry: 0,
                scopes: vec![],
                audience: Some("https://api.example.com".to_string()),
            })
            .await
            .unwrap();
        storage
            .store_api(&ApiRecord {
                name: "Example API".to_string(),
                identifier: "https://api.example.com".to_string(),
                token_expiry: 900,
                token_signing_alg: "RS256".to_string(),
                permissions: vec!["read:items".to_string(), "write:items".to_string()],
            })
            .await
            .unwrap();
        storage
            .store_user(&User {
                id: "user-1".to_string(),
                email: "alice@example.com".to_string(),
                email_verified: true,
                password_hash: hash_password("correct horse").unwrap(),
                password_history: vec![],
                blocked_for: BTreeSet::new(),
                login_count: 0,
                first_name: Some("Alice".to_string()),
                last_name: None,
            })
            .await
            .unwrap();

        let signing_key = Arc::new(SigningKey::from_pem(SIGNING_KEY_PEM, None).unwrap());
        let server = AuthorizationServer::new(
            Stores::from_backend(storage.clone()),
            signing_key,
            Arc::new(Argon2PasswordService::new()),
            Arc::new(MemoryEmailSender::new()),
            settings(),
        );
        (server, storage)
    }

    fn context() -> RequestContext {
        RequestContext::new("10.0.0.1", Some("test-agent"))
    }

    fn authorize_request() -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some("code".to_string()),
            client_id: "client-1".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            scope: Some("openid".to_string()),
            state: Some("xyz".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_authorize_redirects_to_login() {
        let (server, _) = server().await;
        let outcome = server
            .authorize(authorize_request(), &SessionRecord::new(), &context())
            .await
            .unwrap();

        let AuthorizeOutcome::Login(location) = outcome else {
            panic!("expected login redirect");
        };
        let url = Url::parse(&location).unwrap();
        assert_eq!(url.path(), "/login");
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string())
            .unwrap();
        assert!(server.states.validate(&state, "client-1").await);
        assert!(!server.states.validate(&state, "client-2").await);
    }

    #[tokio::test]
    async fn test_authorize_rejects_bad_requests() {
        let (server, _) = server().await;

        let mut request = authorize_request();
        request.response_type = Some("token".to_string());
        assert!(matches!(
            server.authorize(request, &SessionRecord::new(), &context()).await,
            Err(OAuthError::UnsupportedResponseType(_))
        ));

        let mut request = authorize_request();
        request.redirect_uri = "https://evil.example.com/callback".to_string();
        assert!(matches!(
            server.authorize(request, &SessionRecord::new(), &context()).await,
            Err(OAuthError::InvalidClient(_))
        ));

        let mut request = authorize_request();
        request.client_id = "unknown".to_string();
        assert!(matches!(
            server.authorize(request, &SessionRecord::new(), &context()).await,
            Err(OAuthError::InvalidClient(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_binds_registered_audience() {
        let (server, storage) = server().await;

        let mut request = authorize_request();
        request.audience = Some("https://not-registered.example.com".to_string());
        assert!(matches!(
            server.authorize(request, &SessionRecord::new(), &context()).await,
            Err(OAuthError::InvalidRequest(ref m)) if m == "Invalid audience"
        ));

        let mut request = authorize_request();
        request.audience = Some("https://api.example.com".to_string());
        assert!(matches!(
            server.authorize(request, &SessionRecord::new(), &context()).await,
            Ok(AuthorizeOutcome::Login(_))
        ));

        storage
            .store_client(&Client {
                client_id: "machine".to_string(),
                client_secret: Some("machine-secret".to_string()),
                client_name: "Machine".to_string(),
                application_type: ApplicationType::MachineToMachine,
                allowed_callback_urls: vec!["https://app.example.com/callback".to_string()],
                allowed_logout_urls: vec![],
                grant_types: vec![GrantType::ClientCredentials],
                id_token_expiry: 0,
                refresh_token_expiry: 0,
                scopes: vec![],
                audience: None,
            })
            .await
            .unwrap();
        let mut request = authorize_request();
        request.client_id = "machine".to_string();
        assert!(matches!(
            server.authorize(request, &SessionRecord::new(), &context()).await,
            Err(OAuthError::InvalidClient(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticated_session_receives_code() {
        let (server, _) = server().await;
        let mut session = SessionRecord::new();
        session.is_authenticated = true;
        session.user_id = Some("user-1".to_string());
        session.client_id = Some("client-1".to_string());
        session.client_ip = Some("10.0.0.1".to_string());

        let outcome = server
            .authorize(authorize_request(), &session, &context())
            .await
            .unwrap();
        let AuthorizeOutcome::Callback(location) = outcome else {
            panic!("expected callback redirect");
        };
        assert!(location.starts_with("https://app.example.com/callback?code="));
        assert!(location.ends_with("&state=xyz"));

        // Same session from another address goes through login again
        let other = RequestContext::new("10.0.0.2", None);
        let outcome = server
            .authorize(authorize_request(), &session, &other)
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::Login(_)));
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let (server, _) = server().await;

        let mut request = TokenRequest::new(GrantType::ClientCredentials);
        request.client_id = Some("client-1".to_string());
        request.client_secret = Some("secret-1".to_string());

        let response = server.token(request, None, &context()).await.unwrap();
        assert!(response.refresh_token.is_none());
        assert!(response.id_token.is_none());
        assert_eq!(response.expires_in, 900);

        let claims: AccessTokenClaims = server.signing_key().verify(&response.access_token).unwrap();
        assert_eq!(claims.sub, "client-1");
        assert_eq!(claims.scope, "read:items write:items");
        assert_eq!(claims.aud[0], "https://api.example.com");
        assert!(claims.sid.is_none());
    }

    #[tokio::test]
    async fn test_client_credentials_requires_secret() {
        let (server, _) = server().await;

        let mut request = TokenRequest::new(GrantType::ClientCredentials);
        request.client_id = Some("client-1".to_string());
        let err = server.token(request.clone(), None, &context()).await.unwrap_err();
        assert!(matches!(err, OAuthError::Unauthorized(ref m) if m == "Invalid client credentials"));

        request.client_secret = Some("wrong".to_string());
        let err = server.token(request.clone(), None, &context()).await.unwrap_err();
        assert!(matches!(err, OAuthError::Unauthorized(_)));

        request.client_secret = Some("secret-1".to_string());
        request.audience = Some("https://unknown.example.com".to_string());
        let err = server.token(request, None, &context()).await.unwrap_err();
        assert!(matches!(err, OAuthError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_client_credentials_limited_to_registered_audience() {
        let (server, storage) = server().await;
        storage
            .store_api(&ApiRecord {
                name: "Admin API".to_string(),
                identifier: "https://admin.example.com".to_string(),
                token_expiry: 900,
                token_signing_alg: "RS256".to_string(),
                permissions: vec!["delete:everything".to_string()],
            })
            .await
            .unwrap();

        let mut request = TokenRequest::new(GrantType::ClientCredentials);
        request.client_id = Some("client-1".to_string());
        request.client_secret = Some("secret-1".to_string());
        request.audience = Some("https://admin.example.com".to_string());
        let err = server.token(request.clone(), None, &context()).await.unwrap_err();
        assert!(matches!(err, OAuthError::Unauthorized(ref m) if m == "Invalid client credentials"));

        request.audience = Some("https://api.example.com".to_string());
        let response = server.token(request, None, &context()).await.unwrap();
        let claims: AccessTokenClaims = server.signing_key().verify(&response.access_token).unwrap();
        assert_eq!(claims.aud[0], "https://api.example.com");
    }

    #[tokio::test]
    async fn test_unknown_code_is_generic_and_recorded() {
        let (server, storage) = server().await;

        let mut request = TokenRequest::new(GrantType::AuthorizationCode);
        request.client_id = Some("client-1".to_string());
        request.code = Some("not-a-code".to_string());
        request.redirect_uri = Some("https://app.example.com/callback".to_string());

        let err = server.token(request, None, &context()).await.unwrap_err();
        assert!(matches!(err, OAuthError::Unauthorized(ref m) if m == "Invalid authorization code"));

        let events = storage.list_events(None).await.unwrap();
        assert_eq!(events[0].event_type, EventType::FailedCodeExchange);
        assert_eq!(events[0].client_id.as_deref(), Some("client-1"));
    }

    #[test]
    fn test_token_form_parsing() {
        let form = TokenForm {
            grant_type: Some("password".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            TokenRequest::try_from(form),
            Err(OAuthError::UnsupportedGrantType(ref g)) if g == "password"
        ));

        let form = TokenForm::default();
        assert!(matches!(
            TokenRequest::try_from(form),
            Err(OAuthError::InvalidRequest(_))
        ));

        let form = TokenForm {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: Some("abc".to_string()),
            client_secret: Some(String::new()),
            ..Default::default()
        };
        let request = TokenRequest::try_from(form).unwrap();
        assert_eq!(request.grant_type, GrantType::RefreshToken);
        assert!(request.client_secret.is_none());
    }

    #[test]
    fn test_extract_client_auth_prefers_basic() {
        let mut headers = HeaderMap::new();
        let encoded = BASE64_STANDARD.encode("client-1:s3cr:et");
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Basic {}", encoded).parse().unwrap(),
        );
        let form = TokenForm {
            client_id: Some("client-2".to_string()),
            ..Default::default()
        };

        let auth = extract_client_auth(&headers, &form).unwrap();
        assert_eq!(auth.client_id, "client-1");
        assert_eq!(auth.client_secret.as_deref(), Some("s3cr:et"));

        let auth = extract_client_auth(&HeaderMap::new(), &form).unwrap();
        assert_eq!(auth.client_id, "client-2");
        assert!(auth.client_secret.is_none());
        assert!(extract_client_auth(&HeaderMap::new(), &TokenForm::default()).is_none());
    }

    #[test]
    fn test_mismatched_client_ids_are_invalid() {
        let mut request = TokenRequest::new(GrantType::AuthorizationCode);
        request.client_id = Some("client-2".to_string());
        let auth = ClientAuthentication {
            client_id: "client-1".to_string(),
            client_secret: None,
        };
        assert!(matches!(
            requested_client_id(&request, Some(&auth)),
            Err(OAuthError::InvalidRequest(_))
        ));
        assert_eq!(requested_client_id(&request, None).unwrap(), "client-2");
    }

    #[tokio::test]
    async fn test_logout_checks_allowed_urls() {
        let (server, _) = server().await;
        let session = SessionRecord::new();
        assert!(matches!(
            server
                .logout("client-1", "https://evil.example.com/", &session, &context())
                .await,
            Err(OAuthError::InvalidRequest(_))
        ));
        assert_eq!(
            server
                .logout("client-1", "https://app.example.com/", &session, &context())
                .await
                .unwrap(),
            "https://app.example.com/"
        );
    }
}
