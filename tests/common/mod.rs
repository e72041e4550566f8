//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use vsauth::config::{ArtifactSecret, ArtifactSecrets, RateLimitSettings};
use vsauth::oauth::notifications::MemoryEmailSender;
use vsauth::oauth::password::hash_password;
use vsauth::oauth::types::{ApiRecord, ApplicationType, Client, GrantType, User};
use vsauth::oauth::{Argon2PasswordService, AuthorizationServer, ServerSettings, SigningKey};
use vsauth::storage::{ApiStore, ClientStore, MemoryAuthStorage, Stores, UserStore};

pub const ISSUER: &str = "https://auth.example.com";
pub const CALLBACK: &str = "https://app.example.com/callback";
pub const LOGOUT: &str = "https://app.example.com/";
pub const API: &str = "https://api.example.com";
pub const PASSWORD: &str = "correct horse";

const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");

pub struct Harness {
    pub server: Arc<AuthorizationServer>,
    pub storage: Arc<MemoryAuthStorage>,
    pub emails: Arc<MemoryEmailSender>,
}

pub fn settings() -> ServerSettings {
    let mut settings = ServerSettings::new(
        ISSUER,
        ArtifactSecrets {
            state: ArtifactSecret::from("integration-state-secret"),
            authorization_code: ArtifactSecret::from("integration-code-secret"),
            refresh_token: ArtifactSecret::from("integration-refresh-secret"),
            ticket: ArtifactSecret::from("integration-ticket-secret"),
        },
    );
    settings.rate_limits.failed_login = RateLimitSettings::new(2, Duration::hours(1));
    settings
}

pub async fn harness() -> Harness {
    harness_with(settings()).await
}

pub async fn harness_with(settings: ServerSettings) -> Harness {
    let storage = Arc::new(MemoryAuthStorage::new());
    storage
        .store_client(&Client {
            client_id: "web-app".to_string(),
            client_secret: None,
            client_name: "Web App".to_string(),
            application_type: ApplicationType::Spa,
            allowed_callback_urls: vec![CALLBACK.to_string()],
            allowed_logout_urls: vec![LOGOUT.to_string()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            id_token_expiry: 600,
            refresh_token_expiry: 3600,
            scopes: vec![],
            audience: None,
        })
        .await
        .unwrap();
    storage
        .store_client(&Client {
            client_id: "worker".to_string(),
            client_secret: Some("worker-secret".to_string()),
            client_name: "Worker".to_string(),
            application_type: ApplicationType::MachineToMachine,
            allowed_callback_urls: vec![],
            allowed_logout_urls: vec![],
            grant_types: vec![GrantType::ClientCredentials],
            id_token_expiry: 0,
            refresh_token_expiry: 0,
            scopes: vec![],
            audience: Some(API.to_string()),
        })
        .await
        .unwrap();
    storage
        .store_api(&ApiRecord {
            name: "Items API".to_string(),
            identifier: API.to_string(),
            token_expiry: 900,
            token_signing_alg: "RS256".to_string(),
            permissions: vec!["read:items".to_string()],
        })
        .await
        .unwrap();
    storage
        .store_user(&User {
            id: "user-1".to_string(),
            email: "alice@example.com".to_string(),
            email_verified: true,
            password_hash: hash_password(PASSWORD).unwrap(),
            password_history: vec![],
            blocked_for: BTreeSet::new(),
            login_count: 0,
            first_name: Some("Alice".to_string()),
            last_name: Some("Liddell".to_string()),
        })
        .await
        .unwrap();

    let emails = Arc::new(MemoryEmailSender::new());
    let server = Arc::new(AuthorizationServer::new(
        Stores::from_backend(storage.clone()),
        Arc::new(SigningKey::from_pem(SIGNING_KEY_PEM, None).unwrap()),
        Arc::new(Argon2PasswordService::new()),
        emails.clone(),
        settings,
    ));
    Harness {
        server,
        storage,
        emails,
    }
}

/// Value of a query parameter in an absolute URL
pub fn query_param(location: &str, name: &str) -> Option<String> {
    url::Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.to_string())
}
