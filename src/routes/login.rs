//! Start a login with the OIDC provider.

use std::collections::HashMap;

use crate::{
    error::HttpError,
    oidc::{is_local_redirect, LoginState},
    routes::DEFAULT_REDIRECT,
    ServerState,
};

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use time::Duration;
use tower_cookies::{
    cookie::{time::Duration as CookieDuration, SameSite},
    Cookie, Cookies,
};
use tracing::{error, warn};

/// How long the login state cookie lives; matches the lifetime of the sealed
/// state inside it.
const STATE_COOKIE_TTL: Duration = Duration::minutes(5);

#[axum::debug_handler(state = ServerState)]
pub async fn login_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, HttpError> {
    let redirect = match params.get("redirect") {
        Some(target) if is_local_redirect(target) => target.as_str(),
        Some(target) => {
            warn!("ignoring non-local redirect target {:?}", target);
            DEFAULT_REDIRECT
        }
        None => DEFAULT_REDIRECT,
    };

    let login = LoginState::new(redirect);
    let sealed = login.seal(state.auth.key()).map_err(|e| {
        error!("failed to seal login state: {}", e);
        HttpError::Internal("Failed to generate login request")
    })?;

    cookies.add(
        Cookie::build((state_cookie_name(&state), sealed))
            .path("/")
            .http_only(true)
            .secure(!state.config.is_dev())
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(STATE_COOKIE_TTL.whole_seconds()))
            .build(),
    );

    Ok(Redirect::temporary(
        login.authorize_url(state.auth.client()).as_str(),
    ))
}

/// Name of the cookie carrying the login state between `/login` and
/// `/callback`.
pub fn state_cookie_name(state: &ServerState) -> String {
    format!("{}_state", state.config.cookie.name)
}
