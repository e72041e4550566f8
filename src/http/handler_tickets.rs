//! Handles GET /tickets/{action} - the links sent by email

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::context::AppState;
use super::middleware_auth::ClientMeta;
use super::utils_oauth::found;
use crate::errors::TicketError;
use crate::oauth::ticket::TicketAction;

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    #[serde(default)]
    pub ticket: String,
}

/// Redirect target carrying the outcome in the fragment
pub(crate) fn ticket_redirect(base: &str, pairs: &[(&str, &str)]) -> String {
    let mut fragment = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        fragment.append_pair(key, value);
    }
    // Spaces stay readable as %20 in the fragment
    format!("{}#{}", base, fragment.finish().replace('+', "%20"))
}

fn failure_description(err: &TicketError) -> &'static str {
    match err {
        TicketError::Expired => "Link expired",
        TicketError::NotFound => "Link already used or invalid",
        TicketError::PasswordReused | TicketError::ActionFailed(_) => "Unable to complete the request",
    }
}

/// GET /tickets/{action}?ticket=...
///
/// Link-only actions run here. A password reset link is checked and handed to
/// the account page, which posts the new password to /users/change-password.
pub async fn handle_ticket(
    State(state): State<AppState>,
    ClientMeta(context): ClientMeta,
    Path(route): Path<String>,
    Query(query): Query<TicketQuery>,
) -> Response {
    let Some(action) = TicketAction::from_route(&route) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let base = state.ticket_redirect_url.as_str();

    let outcome = match action {
        TicketAction::PasswordResetEmail => state
            .auth_server
            .inspect_ticket(action, &query.ticket)
            .await
            .map(|()| {
                ticket_redirect(
                    base,
                    &[
                        ("success", "true"),
                        ("action", action.route()),
                        ("ticket", &query.ticket),
                    ],
                )
            }),
        _ => state
            .auth_server
            .process_ticket_action(action, &query.ticket, &context)
            .await
            .map(|description| {
                ticket_redirect(base, &[("success", "true"), ("description", description)])
            }),
    };

    match outcome {
        Ok(location) => found(&location),
        Err(err) => {
            tracing::info!(action = action.as_str(), error = ?err, "ticket link rejected");
            found(&ticket_redirect(
                base,
                &[("success", "false"), ("description", failure_description(&err))],
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_redirect_fragment() {
        assert_eq!(
            ticket_redirect(
                "https://auth.example.com/account",
                &[("success", "false"), ("description", "Link expired")]
            ),
            "https://auth.example.com/account#success=false&description=Link%20expired"
        );
    }
}
