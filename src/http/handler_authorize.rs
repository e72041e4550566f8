//! Handles GET /authorize and GET /users/logout

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::context::AppState;
use super::middleware_auth::ClientMeta;
use super::utils_oauth::{found, oauth_error_response};
use super::utils_session::{session_cookie_removal, session_id};
use crate::oauth::auth_server::AuthorizeRequest;

/// GET /authorize
///
/// Sends an already authenticated browser straight back to the client with a
/// code; everyone else goes to the login page with a sealed state.
pub async fn handle_authorize(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    jar: CookieJar,
    Query(request): Query<AuthorizeRequest>,
) -> Response {
    let session = state
        .auth_server
        .load_session(session_id(&jar).as_deref())
        .await;

    match state.auth_server.authorize(request, &session, &context).await {
        Ok(outcome) => found(outcome.location()),
        Err(err) => oauth_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
}

/// GET /users/logout
pub async fn handle_logout(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let session = state
        .auth_server
        .load_session(session_id(&jar).as_deref())
        .await;

    match state
        .auth_server
        .logout(&query.client_id, &query.redirect_uri, &session, &context)
        .await
    {
        Ok(location) => (jar.remove(session_cookie_removal()), found(&location)).into_response(),
        Err(err) => oauth_error_response(err),
    }
}
