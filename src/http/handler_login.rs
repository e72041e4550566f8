//! Handles GET /login and POST /users/login

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::context::AppState;
use super::middleware_auth::ClientMeta;
use super::utils_oauth::login_error_response;
use super::utils_session::{session_cookie, session_id};
use crate::oauth::account::LoginForm;

#[derive(Debug, Deserialize)]
pub struct LoginPageQuery {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub state: String,
}

/// GET /login
///
/// Returns what the login page renders for a pending authorization request.
pub async fn handle_login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginPageQuery>,
) -> Response {
    match state
        .auth_server
        .login_page(&query.client_id, &query.state)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => login_error_response(err),
    }
}

/// POST /users/login
pub async fn handle_login(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    jar: CookieJar,
    Json(form): Json<LoginForm>,
) -> Response {
    let mut session = state
        .auth_server
        .load_session(session_id(&jar).as_deref())
        .await;

    match state.auth_server.login(form, &mut session, &context).await {
        Ok(redirect) => {
            let jar = jar.add(session_cookie(&session.session_id, state.cookie_secure));
            (jar, Json(redirect)).into_response()
        }
        Err(err) => login_error_response(err),
    }
}
