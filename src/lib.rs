//! vsauth: an OAuth2 / OpenID Connect authorization server.
//!
//! Issues encrypted, single-use credential artifacts (states, authorization
//! codes, refresh tokens and email tickets), signs RS256 access and id
//! tokens, and guards logins with point-bucket rate limiting and lockout.

pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
