//! Application state shared by every handler.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Config;
use crate::oauth::auth_server::AuthorizationServer;

#[derive(Clone)]
pub struct AppState {
    /// Credential engine behind every endpoint
    pub auth_server: Arc<AuthorizationServer>,
    /// Where ticket links land after their action ran
    pub ticket_redirect_url: String,
    /// Secure flag on the session cookie
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(auth_server: Arc<AuthorizationServer>, config: &Config) -> Self {
        Self {
            auth_server,
            ticket_redirect_url: config.ticket_redirect_url.clone(),
            cookie_secure: *config.cookie_secure.as_ref(),
        }
    }
}

impl FromRef<AppState> for Arc<AuthorizationServer> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_server.clone()
    }
}
