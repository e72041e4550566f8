//! Handles POST /users/signup, /users/forgot-password and /users/change-password

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use super::context::AppState;
use super::middleware_auth::ClientMeta;
use super::utils_oauth::{login_error_response, rate_limit_headers};
use crate::errors::TicketError;
use crate::oauth::account::{FORGOT_PASSWORD_MESSAGE, SignupForm};

/// POST /users/signup
pub async fn handle_signup(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    Json(form): Json<SignupForm>,
) -> Response {
    match state.auth_server.signup(form, &context).await {
        Ok(user) => Json(json!({
            "id": user.id,
            "email": user.email,
            "email_verified": user.email_verified,
        }))
        .into_response(),
        Err(err) => login_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "clientId")]
    pub client_id: String,
}

/// POST /users/forgot-password
pub async fn handle_forgot_password(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    Json(request): Json<ForgotPasswordRequest>,
) -> Response {
    match state
        .auth_server
        .forgot_password(&request.email, &request.client_id, &context)
        .await
    {
        Ok(decision) => (
            rate_limit_headers(&decision),
            Json(json!({ "message": FORGOT_PASSWORD_MESSAGE })),
        )
            .into_response(),
        Err(err) => login_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub ticket: String,
    #[serde(default)]
    pub password: String,
}

/// POST /users/change-password
pub async fn handle_change_password(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    Json(request): Json<ChangePasswordRequest>,
) -> Response {
    match state
        .auth_server
        .change_password(&request.ticket, &request.password, &context)
        .await
    {
        Ok(message) => Json(json!({ "message": message })).into_response(),
        Err(err) => ticket_error_response(err),
    }
}

fn ticket_error_response(err: TicketError) -> Response {
    let description = match &err {
        TicketError::Expired => "Link expired".to_string(),
        TicketError::NotFound => "Link already used or invalid".to_string(),
        TicketError::PasswordReused => {
            "Password has previously been used. You may not reuse any of the last 3 passwords."
                .to_string()
        }
        TicketError::ActionFailed(detail) => {
            tracing::warn!(error = %detail, "password change failed");
            "Unable to update password".to_string()
        }
    };
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "description": description })),
    )
        .into_response()
}
