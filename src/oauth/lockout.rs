//! Account lockout after repeated failed logins.
//!
//! Failed logins consume points from the per-(email, IP) bucket. When that
//! bucket is breached the IP joins the user's `blocked_for` set and the user
//! receives an unblock link. Blocked addresses are refused before any
//! password comparison.

use chrono::Duration;
use std::sync::Arc;

use crate::errors::StorageError;
use crate::oauth::notifications::{EmailKind, EmailMessage, EmailSender};
use crate::oauth::rate_limit::{RateLimitAxis, RateLimitDecision, RateLimiter};
use crate::oauth::ticket::{ClientInformation, TicketAction, TicketManager, TicketPayload, action_url};
use crate::oauth::types::{AuditEvent, Client, EventType, User};
use crate::storage::traits::{EventStore, UserStore};

/// Outcome of recording a failed login
#[derive(Debug, Clone, PartialEq)]
pub enum FailedLoginOutcome {
    /// Below the threshold
    Counted(RateLimitDecision),
    /// Threshold breached; the IP is now blocked for the user
    LockedOut(RateLimitDecision),
}

#[derive(Clone)]
pub struct LockoutPolicy {
    users: Arc<dyn UserStore>,
    events: Arc<dyn EventStore>,
    rate_limiter: RateLimiter,
    tickets: TicketManager,
    emails: Arc<dyn EmailSender>,
    external_base: String,
    unblock_lifetime: Duration,
}

impl LockoutPolicy {
    pub fn new(
        users: Arc<dyn UserStore>,
        events: Arc<dyn EventStore>,
        rate_limiter: RateLimiter,
        tickets: TicketManager,
        emails: Arc<dyn EmailSender>,
        external_base: String,
        unblock_lifetime: Duration,
    ) -> Self {
        Self {
            users,
            events,
            rate_limiter,
            tickets,
            emails,
            external_base,
            unblock_lifetime,
        }
    }

    /// Cheap check run before the password is compared
    pub fn is_blocked(&self, user: &User, ip: &str) -> bool {
        user.is_blocked_for(ip)
    }

    /// Count a failed login and escalate when the bucket is breached
    pub async fn record_failure(
        &self,
        user: &User,
        client: &Client,
        ip: &str,
    ) -> Result<FailedLoginOutcome, StorageError> {
        let decision = self
            .rate_limiter
            .consume(RateLimitAxis::FailedLogin, &[&user.email, ip], 1)
            .await?;

        if !decision.is_limit_reached {
            return Ok(FailedLoginOutcome::Counted(decision));
        }

        self.escalate(user, client, ip).await?;
        Ok(FailedLoginOutcome::LockedOut(decision))
    }

    async fn escalate(&self, user: &User, client: &Client, ip: &str) -> Result<(), StorageError> {
        self.users.block_ip_for_user(&user.id, ip).await?;
        tracing::warn!(user_id = %user.id, client_id = %client.client_id, "blocked address after failed logins");

        let ticket = self
            .tickets
            .issue(
                &user.id,
                ClientInformation {
                    client_id: client.client_id.clone(),
                    client_name: client.client_name.clone(),
                },
                TicketAction::BlockedAccountEmail,
                ip,
                self.unblock_lifetime,
            )
            .await;

        let ticket = match ticket {
            Ok(ticket) => ticket,
            Err(err) => {
                tracing::error!(error = ?err, user_id = %user.id, "unable to issue unblock ticket");
                return Ok(());
            }
        };

        let message = EmailMessage {
            kind: EmailKind::BlockedAccount,
            to: user.email.clone(),
            user_id: user.id.clone(),
            first_name: user.first_name.clone(),
            client_id: client.client_id.clone(),
            client_name: client.client_name.clone(),
            action_url: action_url(&self.external_base, TicketAction::BlockedAccountEmail, &ticket),
            request_ip: ip.to_string(),
        };

        match self.emails.send(&message).await {
            Ok(()) => {
                let event = AuditEvent::new(
                    EventType::SuccessBlockedAccountEmailSent,
                    "Blocked account email sent",
                )
                .with_client(client)
                .with_user(user)
                .with_ip(ip);
                if let Err(err) = self.events.record_event(&event).await {
                    tracing::error!(error = ?err, "unable to record audit event");
                }
            }
            Err(err) => {
                tracing::error!(error = ?err, user_id = %user.id, "unable to send blocked account email");
            }
        }
        Ok(())
    }

    /// Lift the block recorded in an unblock ticket
    pub async fn unblock(&self, payload: &TicketPayload) -> Result<(), StorageError> {
        let user = self
            .users
            .find_user_by_id(&payload.user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("User {}", payload.user_id)))?;
        let ip = payload.context.request_ip.as_str();

        self.users.unblock_ip_for_user(&user.id, ip).await?;
        self.rate_limiter
            .reset(RateLimitAxis::FailedLogin, &[&user.email, ip])
            .await?;
        self.users.mark_email_verified(&user.id).await?;

        let event = AuditEvent::new(EventType::SuccessUnblockAccount, "Account unblocked")
            .with_client_id(&payload.client_information.client_id)
            .with_user(&user)
            .with_ip(ip);
        if let Err(err) = self.events.record_event(&event).await {
            tracing::error!(error = ?err, "unable to record audit event");
        }
        Ok(())
    }
}
