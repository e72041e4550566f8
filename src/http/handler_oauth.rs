//! Handles POST /oauth/token - exchanges codes, refresh tokens and client credentials for JWTs

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::Form;

use super::context::AppState;
use super::middleware_auth::ClientMeta;
use super::utils_oauth::oauth_error_response;
use crate::oauth::auth_server::{TokenForm, TokenRequest, extract_client_auth};

/// POST /oauth/token
pub async fn handle_oauth_token(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Response {
    // Client authentication from the Authorization header or the form
    let client_auth = extract_client_auth(&headers, &form);

    let request = match TokenRequest::try_from(form) {
        Ok(request) => request,
        Err(err) => return oauth_error_response(err),
    };

    match state.auth_server.token(request, client_auth, &context).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => oauth_error_response(err),
    }
}
