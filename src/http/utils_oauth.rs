//! Response helpers shared by the OAuth and account handlers.

use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::json;

use crate::errors::{LoginError, OAuthError};
use crate::oauth::rate_limit::RateLimitDecision;

/// 302 redirect
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => {
            tracing::error!(error = ?err, "redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `X-RateLimit-*` headers describing a bucket
pub(crate) fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let reset_in = (decision.reset_at - Utc::now()).num_seconds().max(0);
    let mut headers = HeaderMap::new();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining()));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_in));
    headers
}

pub(crate) fn too_many_requests(decision: &RateLimitDecision) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        rate_limit_headers(decision),
        "Too Many Requests",
    )
        .into_response()
}

fn anomaly_detected() -> Response {
    let body = json!({
        "code": "too_many_attempts",
        "description": "Your account has been blocked after multiple consecutive login attempts",
        "name": "AnomalyDetected",
        "status": 429
    });
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

fn server_error() -> Response {
    let body = json!({
        "code": "server_error",
        "description": "Something went wrong",
        "name": "ServerError",
        "status": 500
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Map a login-family error onto its status and body
pub(crate) fn login_error_response(err: LoginError) -> Response {
    match err {
        LoginError::Validation(validations) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "validations": validations }))).into_response()
        }
        LoginError::InvalidState => {
            let body = json!({
                "code": "invalid_state",
                "description": "Login request is no longer valid",
                "name": "InvalidState",
                "status": 400
            });
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
        LoginError::InvalidCredentials => {
            let body = json!({
                "code": "failed_login",
                "description": "Username or password is wrong",
                "name": "FailedLogin",
                "status": 401
            });
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
        LoginError::Blocked => anomaly_detected(),
        LoginError::LockedOut(decision) => {
            let mut response = anomaly_detected();
            response.headers_mut().extend(rate_limit_headers(&decision));
            response
        }
        LoginError::RateLimited(decision) => too_many_requests(&decision),
        LoginError::Internal(message) => {
            tracing::error!(error = %message, "account request failed");
            server_error()
        }
    }
}

/// Map a token-endpoint error onto its status and body
pub(crate) fn oauth_error_response(err: OAuthError) -> Response {
    let (status, body) = match err {
        OAuthError::InvalidRequest(description) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "invalid_request", "error_description": description }),
        ),
        OAuthError::UnsupportedGrantType(grant_type) => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": "unsupported_grant_type",
                "error_description": format!("Unsupported grant type: {}", grant_type)
            }),
        ),
        OAuthError::UnsupportedResponseType(response_type) => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": "unsupported_response_type",
                "error_description": format!("Unsupported response type: {}", response_type)
            }),
        ),
        OAuthError::InvalidClient(description) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "invalid_client", "error_description": description }),
        ),
        OAuthError::Unauthorized(error_message) => (
            StatusCode::FORBIDDEN,
            json!({ "error": "unauthorized", "error_message": error_message }),
        ),
        OAuthError::ServerError(detail) => {
            tracing::error!(error = %detail, "oauth request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "something went wrong" }),
            )
        }
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn decision(consumed_points: u32, limit: u32) -> RateLimitDecision {
        RateLimitDecision {
            consumed_points,
            limit,
            is_limit_reached: consumed_points > limit,
            reset_at: Utc::now() + Duration::seconds(30),
        }
    }

    #[test]
    fn test_rate_limit_headers_never_negative() {
        let headers = rate_limit_headers(&decision(12, 10));
        assert_eq!(headers["X-RateLimit-Limit"], "10");
        assert_eq!(headers["X-RateLimit-Remaining"], "0");
        let reset: i64 = headers["X-RateLimit-Reset"].to_str().unwrap().parse().unwrap();
        assert!((0..=30).contains(&reset));
    }

    #[test]
    fn test_login_error_statuses() {
        assert_eq!(
            login_error_response(LoginError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            login_error_response(LoginError::Blocked).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let response = login_error_response(LoginError::RateLimited(decision(11, 10)));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");
    }

    #[test]
    fn test_unauthorized_maps_to_forbidden() {
        let response = oauth_error_response(OAuthError::Unauthorized(
            "Invalid refresh token".to_string(),
        ));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
