//! Axum HTTP handlers, extractors and router for the authorization server endpoints.

pub mod context;
mod handler_account;
mod handler_authorize;
mod handler_login;
mod handler_oauth;
mod handler_tickets;
mod handler_userinfo;
mod handler_well_known;
pub mod middleware_auth;
pub mod server;
mod utils_oauth;
mod utils_session;

pub use context::AppState;
pub use server::build_router;
