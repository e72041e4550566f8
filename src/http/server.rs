//! Main router configuration assembling the authorization server endpoints.

use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::{
    context::AppState,
    handler_account::{handle_change_password, handle_forgot_password, handle_signup},
    handler_authorize::{handle_authorize, handle_logout},
    handler_login::{handle_login, handle_login_page},
    handler_oauth::handle_oauth_token,
    handler_tickets::handle_ticket,
    handler_userinfo::get_userinfo_handler,
    handler_well_known::{jwks_handler, openid_configuration_handler},
};

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    // Token and userinfo are called cross-origin by browser clients
    let api_cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    let api_routes = Router::new()
        .route("/oauth/token", post(handle_oauth_token))
        .route("/userinfo", get(get_userinfo_handler))
        .layer(api_cors);

    let user_routes = Router::new()
        .route("/login", post(handle_login))
        .route("/signup", post(handle_signup))
        .route("/forgot-password", post(handle_forgot_password))
        .route("/change-password", post(handle_change_password))
        .route("/logout", get(handle_logout));

    let well_known_routes = Router::new()
        .route("/openid-configuration", get(openid_configuration_handler))
        .route("/jwks.json", get(jwks_handler));

    Router::new()
        .route("/authorize", get(handle_authorize))
        .route("/login", get(handle_login_page))
        .route("/tickets/{action}", get(handle_ticket))
        .nest("/users", user_routes)
        .nest("/.well-known", well_known_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

