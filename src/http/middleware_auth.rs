//! Request extractors for the caller's address and bearer credentials.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::StatusCode;
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::response::{IntoResponse, Response};
use http::HeaderMap;
use http::request::Parts;
use serde_json::json;
use std::net::SocketAddr;

use crate::oauth::auth_server::RequestContext;

/// Address and user agent of the caller.
///
/// The address comes from the first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer when the server was started with
/// connect info.
#[derive(Clone, Debug)]
pub struct ClientMeta(pub RequestContext);

/// Bearer access token from the `Authorization` header
#[derive(Clone, Debug)]
pub struct BearerToken(pub String);

pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = extract_client_ip(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok());
        Ok(ClientMeta(RequestContext::new(&ip, user_agent)))
    }
}

fn invalid_token(description: &str) -> Response {
    let body = json!({
        "error": "invalid_token",
        "error_description": description
    });
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| invalid_token("Missing Authorization header"))?;

        match header.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
                Ok(BearerToken(token.trim().to_string()))
            }
            _ => Err(invalid_token("Authorization header must carry a Bearer token")),
        }
    }
}
