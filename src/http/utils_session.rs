//! Session cookie transport.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

pub(crate) const SESSION_COOKIE_NAME: &str = "vsauth.sid";

/// Session id carried by the request, if any
pub(crate) fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn session_cookie(session_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Cookie that makes `CookieJar::remove` match the session cookie's path
pub(crate) fn session_cookie_removal() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, "")).path("/").build()
}
