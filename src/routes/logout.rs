//! End a session.

use crate::{auth::CurrentSession, oidc::logout_redirect, ServerState};

use axum::{extract::State, response::Redirect};
use tower_cookies::{Cookie, Cookies};
use tracing::{error, info};
use uuid::Uuid;

/// Delete the session named by the cookie, even one that no longer opens,
/// and end the provider's session when it has a logout endpoint.
#[axum::debug_handler(state = ServerState)]
pub async fn logout_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
    session: Option<CurrentSession>,
) -> Redirect {
    let id = cookies
        .get(&state.config.cookie.name)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());

    if let Some(id) = id {
        match state.auth.delete_session(&id).await {
            Ok(()) => info!(session = %id, "user logged out"),
            Err(e) => error!(session = %id, "failed to delete session: {}", e),
        }
    }

    let id_token = session
        .map(|CurrentSession(session)| session.id_token.clone())
        .filter(|t| !t.is_empty());

    cookies.remove(
        Cookie::build((state.config.cookie.name.clone(), ""))
            .path("/")
            .build(),
    );

    Redirect::to(&logout_redirect(&state.config, id_token.as_deref()))
}
