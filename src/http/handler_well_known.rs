//! Handles the discovery endpoints - OpenID configuration and JWKS

use axum::extract::State;
use axum::response::Json;
use serde_json::{Value, json};

use super::context::AppState;
use crate::oauth::signing::Jwks;

/// OpenID Connect Configuration handler
/// GET /.well-known/openid-configuration
pub async fn openid_configuration_handler(State(state): State<AppState>) -> Json<Value> {
    let issuer = state.auth_server.issuer();
    let metadata = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "userinfo_endpoint": format!("{}/userinfo", issuer),
        "end_session_endpoint": format!("{}/users/logout", issuer),
        "jwks_uri": format!("{}/.well-known/jwks.json", issuer),
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": ["authorization_code", "client_credentials", "refresh_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
        "claims_supported": ["iss", "sub", "aud", "exp", "iat", "sid", "email", "email_verified"]
    });

    Json(metadata)
}

/// JWKS (JSON Web Key Set) handler
/// GET /.well-known/jwks.json
pub async fn jwks_handler(State(state): State<AppState>) -> Json<Jwks> {
    Json(state.auth_server.signing_key().jwks())
}
