//! Handles GET /userinfo - OpenID Connect UserInfo endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use super::context::AppState;
use super::middleware_auth::{BearerToken, ClientMeta};
use super::utils_oauth::{rate_limit_headers, too_many_requests};
use crate::errors::UserInfoError;

/// GET /userinfo
///
/// Returns the profile of the user behind a bearer access token.
pub async fn get_userinfo_handler(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    BearerToken(token): BearerToken,
) -> Response {
    match state.auth_server.userinfo(&token, &context).await {
        Ok((user_info, decision)) => (rate_limit_headers(&decision), Json(user_info)).into_response(),
        Err(UserInfoError::InvalidToken) => {
            let body = json!({
                "error": "invalid_token",
                "error_description": "Access token is invalid"
            });
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
        Err(UserInfoError::RateLimited(decision)) => too_many_requests(&decision),
        Err(UserInfoError::Internal(detail)) => {
            tracing::error!(error = %detail, "userinfo lookup failed");
            let body = json!({ "error": "something went wrong" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}
