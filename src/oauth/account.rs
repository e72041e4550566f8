//! Login and the account lifecycle flows: signup, forgot password and the
//! email ticket actions.

use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::errors::{FieldError, LoginError, TicketError};
use crate::oauth::auth_server::{AuthorizationServer, RequestContext, callback_url};
use crate::oauth::authorization_code::AuthorizationCodePayload;
use crate::oauth::lockout::FailedLoginOutcome;
use crate::oauth::notifications::{EmailKind, EmailMessage};
use crate::oauth::password::next_password_history;
use crate::oauth::rate_limit::{RateLimitAxis, RateLimitDecision};
use crate::oauth::ticket::{ClientInformation, TicketAction, action_url};
use crate::oauth::types::{AuditEvent, Client, EventType, SessionRecord, User};

/// Body of every forgot-password answer, whether or not the email is known
pub const FORGOT_PASSWORD_MESSAGE: &str = "We've just sent you an email to reset your password.";

/// Login form posted by the login page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, alias = "clientId")]
    pub client_id: String,
}

impl LoginForm {
    fn validate(&self) -> Result<(), LoginError> {
        let mut errors = Vec::new();
        if !is_email(&self.email) {
            errors.push(FieldError::new("email", "email is invalid"));
        }
        if self.password.is_empty() {
            errors.push(FieldError::new("password", "password is required"));
        }
        if self.state.is_empty() {
            errors.push(FieldError::new("state", "state is required"));
        }
        if self.client_id.is_empty() {
            errors.push(FieldError::new("client_id", "client_id is required"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoginError::Validation(errors))
        }
    }
}

/// Signup form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "clientId")]
    pub client_id: String,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
}

/// Successful login: where the login page sends the browser next
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LoginRedirect {
    pub redirect_uri: String,
}

/// What the login page needs to render for a pending authorization
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPage {
    pub client_id: String,
    pub client_name: String,
    pub state: String,
}

fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

impl AuthorizationServer {
    /// Authenticate a user against a state issued by `authorize`.
    ///
    /// On success the session is regenerated, bound to the user, client and
    /// address, and the browser is sent to the client callback with a code.
    pub async fn login(
        &self,
        form: LoginForm,
        session: &mut SessionRecord,
        context: &RequestContext,
    ) -> Result<LoginRedirect, LoginError> {
        form.validate()?;

        let decision = self
            .rate_limiter
            .consume(RateLimitAxis::Login, &[&context.ip], 1)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        if decision.is_limit_reached {
            return Err(LoginError::RateLimited(decision));
        }

        let Some(state) = self.states.resolve(&form.state, &form.client_id).await else {
            return Err(LoginError::InvalidState);
        };
        let Some(client) = self.find_client(&form.client_id).await? else {
            return Err(LoginError::InvalidState);
        };

        let user = self
            .users
            .find_user_by_email(&form.email)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        let Some(user) = user else {
            tracing::info!(client_id = %client.client_id, "login for unknown user");
            self.record_failed_login(&client, None, context).await;
            return Err(LoginError::InvalidCredentials);
        };

        if self.lockout.is_blocked(&user, &context.ip) {
            tracing::info!(user_id = %user.id, "login from blocked address");
            return Err(LoginError::Blocked);
        }

        if !self.passwords.verify(&form.password, &user.password_hash).await {
            self.record_failed_login(&client, Some(&user), context).await;
            let outcome = self
                .lockout
                .record_failure(&user, &client, &context.ip)
                .await
                .map_err(|e| LoginError::Internal(e.to_string()))?;
            return match outcome {
                FailedLoginOutcome::LockedOut(decision) => Err(LoginError::LockedOut(decision)),
                FailedLoginOutcome::Counted(_) => Err(LoginError::InvalidCredentials),
            };
        }

        let claimed = self
            .states
            .consume(&state.external_id)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        if !claimed {
            return Err(LoginError::InvalidState);
        }

        // Fresh session id on every login
        if let Err(err) = self.sessions.destroy_session(&session.session_id).await {
            tracing::warn!(error = ?err, "unable to drop previous session");
        }
        *session = SessionRecord::new();

        let payload = state.payload;
        let code = self
            .codes
            .issue(AuthorizationCodePayload {
                user_id: user.id.clone(),
                client_id: client.client_id.clone(),
                code_challenge: payload.code_challenge,
                code_challenge_method: payload.code_challenge_method,
                callback_url: payload.callback_url.clone(),
                scope: payload.scope.clone(),
                audience: payload.audience,
                session_id: session.session_id.clone(),
            })
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;

        session.user_id = Some(user.id.clone());
        session.client_id = Some(client.client_id.clone());
        session.client_ip = Some(context.ip.clone());
        session.is_authenticated = true;
        session.scope = Some(payload.scope);
        session.authorization_code = Some(code.clone());
        self.sessions
            .save_session(session, Utc::now() + *self.settings.lifetimes.session.as_ref())
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;

        if let Err(err) = self.users.increment_login_count(&user.id).await {
            tracing::error!(error = ?err, user_id = %user.id, "unable to increment login count");
        }

        self.record(
            AuditEvent::new(EventType::SuccessLogin, "Successful login")
                .with_client(&client)
                .with_user(&user)
                .with_ip(&context.ip)
                .with_user_agent(context.user_agent.as_deref()),
        )
        .await;
        tracing::info!(user_id = %user.id, client_id = %client.client_id, "login succeeded");

        let redirect_uri = callback_url(&payload.callback_url, &code, payload.client_state.as_deref())
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        Ok(LoginRedirect { redirect_uri })
    }

    /// Check the sealed state carried to the login page
    pub async fn login_page(&self, client_id: &str, state: &str) -> Result<LoginPage, LoginError> {
        if self.states.resolve(state, client_id).await.is_none() {
            return Err(LoginError::InvalidState);
        }
        let Some(client) = self.find_client(client_id).await? else {
            return Err(LoginError::InvalidState);
        };
        Ok(LoginPage {
            client_id: client.client_id,
            client_name: client.client_name,
            state: state.to_string(),
        })
    }

    /// Create an account and send the verification email
    pub async fn signup(&self, form: SignupForm, context: &RequestContext) -> Result<User, LoginError> {
        let mut errors = Vec::new();
        if !is_email(&form.email) {
            errors.push(FieldError::new("email", "email is invalid"));
        }
        if form.password.is_empty() {
            errors.push(FieldError::new("password", "password is required"));
        }
        if !errors.is_empty() {
            return Err(LoginError::Validation(errors));
        }

        let Some(client) = self.find_client(&form.client_id).await? else {
            return Err(LoginError::Validation(vec![FieldError::new(
                "client_id",
                "client not found",
            )]));
        };

        let existing = self
            .users
            .find_user_by_email(&form.email)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        if existing.is_some() {
            return Err(LoginError::Validation(vec![FieldError::new(
                "email",
                "user already exist",
            )]));
        }

        let password_hash = self
            .passwords
            .hash(&form.password)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        let user = User {
            id: ulid::Ulid::new().to_string(),
            email: form.email.trim().to_string(),
            email_verified: false,
            password_hash,
            password_history: vec![],
            blocked_for: BTreeSet::new(),
            login_count: 0,
            first_name: form.first_name.filter(|v| !v.is_empty()),
            last_name: form.last_name.filter(|v| !v.is_empty()),
        };
        self.users
            .store_user(&user)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;

        let sent = self
            .send_ticket_email(
                &user,
                &client,
                TicketAction::VerifyEmail,
                &context.ip,
            )
            .await;
        if sent {
            self.record(
                AuditEvent::new(
                    EventType::SuccessVerificationEmailSent,
                    "Verification email sent successfully",
                )
                .with_client(&client)
                .with_user(&user)
                .with_ip(&context.ip)
                .with_user_agent(context.user_agent.as_deref()),
            )
            .await;
        }
        Ok(user)
    }

    /// Send a password reset link. Callers answer with
    /// [`FORGOT_PASSWORD_MESSAGE`] whether or not the email is known.
    pub async fn forgot_password(
        &self,
        email: &str,
        client_id: &str,
        context: &RequestContext,
    ) -> Result<RateLimitDecision, LoginError> {
        let decision = self
            .rate_limiter
            .consume(RateLimitAxis::ForgotPassword, &[&context.ip], 1)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        if decision.is_limit_reached {
            return Err(LoginError::RateLimited(decision));
        }

        let Some(client) = self.find_client(client_id).await? else {
            return Err(LoginError::Validation(vec![FieldError::new(
                "client_id",
                "client not found",
            )]));
        };

        let user = self
            .users
            .find_user_by_email(email)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;
        let Some(user) = user else {
            tracing::info!(client_id = %client_id, "forgot password for unknown email");
            return Ok(decision);
        };

        if self
            .send_ticket_email(&user, &client, TicketAction::PasswordResetEmail, &context.ip)
            .await
        {
            self.record(
                AuditEvent::new(
                    EventType::SuccessChangePasswordRequest,
                    "Password reset email sent successfully",
                )
                .with_client(&client)
                .with_user(&user)
                .with_ip(&context.ip)
                .with_user_agent(context.user_agent.as_deref()),
            )
            .await;
        }
        Ok(decision)
    }

    /// Check a ticket link before showing its form
    pub async fn inspect_ticket(&self, action: TicketAction, ticket: &str) -> Result<(), TicketError> {
        let resolved = self.tickets.resolve(ticket).await?;
        if resolved.payload.context.action != action {
            return Err(TicketError::NotFound);
        }
        Ok(())
    }

    /// Run a link-only ticket action (verify email, unblock account).
    /// Returns the success description shown to the user.
    pub async fn process_ticket_action(
        &self,
        action: TicketAction,
        ticket: &str,
        context: &RequestContext,
    ) -> Result<&'static str, TicketError> {
        if action == TicketAction::PasswordResetEmail {
            return Err(TicketError::ActionFailed(
                "password reset requires a new password".to_string(),
            ));
        }
        self.inspect_ticket(action, ticket).await?;
        let claimed = self.tickets.claim(ticket).await?;
        let payload = &claimed.payload;

        let description = match action {
            TicketAction::BlockedAccountEmail => {
                self.lockout
                    .unblock(payload)
                    .await
                    .map_err(|e| TicketError::ActionFailed(e.to_string()))?;
                "Account is unblocked"
            }
            _ => {
                self.users
                    .mark_email_verified(&payload.user_id)
                    .await
                    .map_err(|e| TicketError::ActionFailed(e.to_string()))?;
                let mut event = AuditEvent::new(EventType::SuccessVerifyEmail, "Email verified")
                    .with_client_id(&payload.client_information.client_id)
                    .with_ip(&context.ip)
                    .with_user_agent(context.user_agent.as_deref());
                event.user_id = Some(payload.user_id.clone());
                self.record(event).await;
                "Email verified successfully"
            }
        };

        if let Err(err) = self.tickets.consume(ticket).await {
            tracing::warn!(error = ?err, "unable to delete used ticket");
        }
        Ok(description)
    }

    /// Complete a password reset. A reused password leaves the ticket usable.
    pub async fn change_password(
        &self,
        ticket: &str,
        new_password: &str,
        context: &RequestContext,
    ) -> Result<&'static str, TicketError> {
        if new_password.is_empty() {
            return Err(TicketError::ActionFailed("password is required".to_string()));
        }

        let resolved = self.tickets.resolve(ticket).await?;
        if resolved.payload.context.action != TicketAction::PasswordResetEmail {
            return Err(TicketError::NotFound);
        }

        let user = self
            .users
            .find_user_by_id(&resolved.payload.user_id)
            .await
            .map_err(|e| TicketError::ActionFailed(e.to_string()))?
            .ok_or(TicketError::NotFound)?;

        let history = next_password_history(
            self.passwords.as_ref(),
            &user.password_history,
            &user.password_hash,
            new_password,
        )
        .await?;

        let claimed = self.tickets.claim(ticket).await?;
        let password_hash = self
            .passwords
            .hash(new_password)
            .await
            .map_err(|e| TicketError::ActionFailed(e.to_string()))?;
        self.users
            .update_password(&user.id, &password_hash, &history)
            .await
            .map_err(|e| TicketError::ActionFailed(e.to_string()))?;
        self.users
            .mark_email_verified(&user.id)
            .await
            .map_err(|e| TicketError::ActionFailed(e.to_string()))?;

        if let Err(err) = self.tickets.consume(ticket).await {
            tracing::warn!(error = ?err, "unable to delete used ticket");
        }

        self.record(
            AuditEvent::new(EventType::SuccessChangePassword, "Password changed")
                .with_client_id(&claimed.payload.client_information.client_id)
                .with_user(&user)
                .with_ip(&context.ip)
                .with_user_agent(context.user_agent.as_deref()),
        )
        .await;
        tracing::info!(user_id = %user.id, "password changed");
        Ok("Successfully updated password")
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, LoginError> {
        self.clients
            .get_client_by_client_id(client_id)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))
    }

    async fn record_failed_login(&self, client: &Client, user: Option<&User>, context: &RequestContext) {
        let mut event = AuditEvent::new(EventType::FailedLogin, "Username or password is wrong")
            .with_client(client)
            .with_ip(&context.ip)
            .with_user_agent(context.user_agent.as_deref());
        if let Some(user) = user {
            event = event.with_user(user);
        }
        self.record(event).await;
    }

    /// Issue a ticket for `action` and email its link. Failures are logged;
    /// the caller's flow continues either way.
    async fn send_ticket_email(
        &self,
        user: &User,
        client: &Client,
        action: TicketAction,
        ip: &str,
    ) -> bool {
        let (kind, lifetime) = match action {
            TicketAction::VerifyEmail => (EmailKind::VerifyEmail, &self.settings.lifetimes.verify_email),
            TicketAction::PasswordResetEmail => {
                (EmailKind::PasswordReset, &self.settings.lifetimes.password_reset)
            }
            TicketAction::BlockedAccountEmail => {
                (EmailKind::BlockedAccount, &self.settings.lifetimes.unblock_account)
            }
        };

        let ticket = self
            .tickets
            .issue(
                &user.id,
                ClientInformation {
                    client_id: client.client_id.clone(),
                    client_name: client.client_name.clone(),
                },
                action,
                ip,
                *lifetime.as_ref(),
            )
            .await;
        let ticket = match ticket {
            Ok(ticket) => ticket,
            Err(err) => {
                tracing::error!(error = ?err, user_id = %user.id, "unable to issue ticket");
                return false;
            }
        };

        let message = EmailMessage {
            kind,
            to: user.email.clone(),
            user_id: user.id.clone(),
            first_name: user.first_name.clone(),
            client_id: client.client_id.clone(),
            client_name: client.client_name.clone(),
            action_url: action_url(&self.settings.issuer, action, &ticket),
            request_ip: ip.to_string(),
        };
        match self.emails.send(&message).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = ?err, user_id = %user.id, kind = ?kind, "unable to send email");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtifactSecret, ArtifactSecrets, RateLimitSettings};
    use crate::oauth::auth_server::ServerSettings;
    use crate::oauth::notifications::MemoryEmailSender;
    use crate::oauth::password::{Argon2PasswordService, hash_password};
    use crate::oauth::signing::SigningKey;
    use crate::oauth::state::StatePayload;
    use crate::oauth::types::{ApplicationType, GrantType};
    use crate::storage::Stores;
    use crate::storage::inmemory::MemoryAuthStorage;
    use crate::storage::traits::{ClientStore, EventStore, UserStore};
    use chrono::Duration;
    use std::sync::Arc;

    const SIGNING_KEY_PEM: &str = include_str!("../../tests/fixtures/signing_key.pem");

    struct Harness {
        server: AuthorizationServer,
        storage: Arc<MemoryAuthStorage>,
        emails: Arc<MemoryEmailSender>,
    }

    async fn harness() -> Harness {
        let storage = Arc::new(MemoryAuthStorage::new());
        storage
            .store_client(&Client {
                client_id: "client-1".to_string(),
                client_secret: None,
                client_name: "Example App".to_string(),
                application_type: ApplicationType::Spa,
                allowed_callback_urls: vec!["https://app.example.com/callback".to_string()],
                allowed_logout_urls: vec![],
                grant_types: vec![GrantType::AuthorizationCode],
                id_token_expiry: 0,
                refresh_token_expiry: 0,
                scopes: vec![],
                audience: None,
            })
            .await
            .unwrap();
        storage
            .store_user(&User {
                id: "user-1".to_string(),
                email: "alice@example.com".to_string(),
                email_verified: false,
                password_hash: hash_password("correct horse").unwrap(),
                password_history: vec![],
                blocked_for: BTreeSet::new(),
                login_count: 0,
                first_name: Some("Alice".to_string()),
                last_name: None,
            })
            .await
            .unwrap();

        let mut settings = ServerSettings::new(
            "https://auth.example.com",
            ArtifactSecrets {
                state: ArtifactSecret::from("state-secret"),
                authorization_code: ArtifactSecret::from("code-secret"),
                refresh_token: ArtifactSecret::from("refresh-secret"),
                ticket: ArtifactSecret::from("ticket-secret"),
            },
        );
        settings.rate_limits.failed_login = RateLimitSettings::new(2, Duration::hours(1));

        let emails = Arc::new(MemoryEmailSender::new());
        let server = AuthorizationServer::new(
            Stores::from_backend(storage.clone()),
            Arc::new(SigningKey::from_pem(SIGNING_KEY_PEM, None).unwrap()),
            Arc::new(Argon2PasswordService::new()),
            emails.clone(),
            settings,
        );
        Harness {
            server,
            storage,
            emails,
        }
    }

    async fn issue_state(server: &AuthorizationServer) -> String {
        server
            .states
            .issue(StatePayload {
                client_id: "client-1".to_string(),
                client_state: Some("abc".to_string()),
                callback_url: "https://app.example.com/callback".to_string(),
                scope: "openid".to_string(),
                audience: None,
                code_challenge: None,
                code_challenge_method: None,
            })
            .await
            .unwrap()
    }

    fn form(state: &str, password: &str) -> LoginForm {
        LoginForm {
            email: "alice@example.com".to_string(),
            password: password.to_string(),
            state: state.to_string(),
            client_id: "client-1".to_string(),
        }
    }

    fn context() -> RequestContext {
        RequestContext::new("10.0.0.1", None)
    }

    fn ticket_from(url: &str) -> String {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "ticket")
            .map(|(_, v)| v.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_success_regenerates_session() {
        let h = harness().await;
        let state = issue_state(&h.server).await;
        let mut session = SessionRecord::new();
        let original_id = session.session_id.clone();

        let redirect = h
            .server
            .login(form(&state, "correct horse"), &mut session, &context())
            .await
            .unwrap();

        assert!(redirect.redirect_uri.starts_with("https://app.example.com/callback?code="));
        assert!(redirect.redirect_uri.ends_with("&state=abc"));
        assert_ne!(session.session_id, original_id);
        assert!(session.is_authenticated_for("client-1", "10.0.0.1"));

        let user = h.storage.find_user_by_id("user-1").await.unwrap().unwrap();
        assert_eq!(user.login_count, 1);

        // The state is single use
        let mut session = SessionRecord::new();
        assert!(matches!(
            h.server
                .login(form(&state, "correct horse"), &mut session, &context())
                .await,
            Err(LoginError::InvalidState)
        ));
    }

    #[tokio::test]
    async fn test_login_validation_and_unknown_user() {
        let h = harness().await;
        let mut session = SessionRecord::new();

        let err = h
            .server
            .login(LoginForm::default(), &mut session, &context())
            .await
            .unwrap_err();
        let LoginError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.len(), 4);

        let state = issue_state(&h.server).await;
        let mut unknown = form(&state, "correct horse");
        unknown.email = "bob@example.com".to_string();
        assert!(matches!(
            h.server.login(unknown, &mut session, &context()).await,
            Err(LoginError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_lockout_blocks_even_correct_password() {
        let h = harness().await;
        let state = issue_state(&h.server).await;
        let mut session = SessionRecord::new();

        for _ in 0..2 {
            assert!(matches!(
                h.server.login(form(&state, "wrong"), &mut session, &context()).await,
                Err(LoginError::InvalidCredentials)
            ));
        }
        assert!(matches!(
            h.server.login(form(&state, "wrong"), &mut session, &context()).await,
            Err(LoginError::LockedOut(_))
        ));
        assert!(matches!(
            h.server
                .login(form(&state, "correct horse"), &mut session, &context())
                .await,
            Err(LoginError::Blocked)
        ));

        let email = h.emails.last_of(EmailKind::BlockedAccount).unwrap();
        let ticket = ticket_from(&email.action_url);
        let description = h
            .server
            .process_ticket_action(TicketAction::BlockedAccountEmail, &ticket, &context())
            .await
            .unwrap();
        assert_eq!(description, "Account is unblocked");

        assert!(
            h.server
                .login(form(&state, "correct horse"), &mut session, &context())
                .await
                .is_ok()
        );
        assert_eq!(
            h.server
                .process_ticket_action(TicketAction::BlockedAccountEmail, &ticket, &context())
                .await,
            Err(TicketError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_signup_sends_verification() {
        let h = harness().await;
        let user = h
            .server
            .signup(
                SignupForm {
                    email: "carol@example.com".to_string(),
                    password: "s3cret-pass".to_string(),
                    client_id: "client-1".to_string(),
                    first_name: Some("Carol".to_string()),
                    last_name: None,
                },
                &context(),
            )
            .await
            .unwrap();
        assert!(!user.email_verified);

        let email = h.emails.last_of(EmailKind::VerifyEmail).unwrap();
        assert_eq!(email.to, "carol@example.com");
        let ticket = ticket_from(&email.action_url);

        // A verify ticket cannot be used on another action route
        assert_eq!(
            h.server
                .process_ticket_action(TicketAction::BlockedAccountEmail, &ticket, &context())
                .await,
            Err(TicketError::NotFound)
        );
        h.server
            .process_ticket_action(TicketAction::VerifyEmail, &ticket, &context())
            .await
            .unwrap();
        let stored = h.storage.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(stored.email_verified);

        let duplicate = h
            .server
            .signup(
                SignupForm {
                    email: "carol@example.com".to_string(),
                    password: "another".to_string(),
                    client_id: "client-1".to_string(),
                    ..Default::default()
                },
                &context(),
            )
            .await;
        assert!(matches!(duplicate, Err(LoginError::Validation(_))));
    }

    #[tokio::test]
    async fn test_forgot_password_and_reset() {
        let h = harness().await;

        h.server
            .forgot_password("nobody@example.com", "client-1", &context())
            .await
            .unwrap();
        assert!(h.emails.last_of(EmailKind::PasswordReset).is_none());

        h.server
            .forgot_password("alice@example.com", "client-1", &context())
            .await
            .unwrap();
        let email = h.emails.last_of(EmailKind::PasswordReset).unwrap();
        let ticket = ticket_from(&email.action_url);
        h.server
            .inspect_ticket(TicketAction::PasswordResetEmail, &ticket)
            .await
            .unwrap();

        assert_eq!(
            h.server
                .change_password(&ticket, "correct horse", &context())
                .await,
            Err(TicketError::PasswordReused)
        );
        assert_eq!(
            h.server
                .change_password(&ticket, "battery staple", &context())
                .await
                .unwrap(),
            "Successfully updated password"
        );

        let user = h.storage.find_user_by_id("user-1").await.unwrap().unwrap();
        assert!(user.email_verified);
        assert_eq!(user.password_history.len(), 1);
        assert_eq!(
            h.server
                .change_password(&ticket, "another one", &context())
                .await,
            Err(TicketError::NotFound)
        );

        let events = h.storage.list_events(None).await.unwrap();
        assert_eq!(events[0].event_type, EventType::SuccessChangePassword);
    }
}
