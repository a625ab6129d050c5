//! A route for handling the OIDC callback.

use std::collections::HashMap;

use crate::{
    auth::SESSION_TTL,
    error::HttpError,
    oidc::LoginState,
    routes::login::state_cookie_name,
    ServerState,
};

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use tower_cookies::{
    cookie::{time::Duration as CookieDuration, SameSite},
    Cookie, Cookies,
};
use tracing::{error, warn};

/// A handler for receiving the callback during the OIDC flow.
#[axum::debug_handler(state = ServerState)]
pub async fn callback_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, HttpError> {
    if let Some(err) = params.get("error") {
        warn!(
            "provider returned an error: {} {}",
            err,
            params.get("error_description").map_or("", String::as_str)
        );
        return Err(HttpError::BadRequest("Login failed"));
    }

    let state_param = params
        .get("state")
        .ok_or(HttpError::BadRequest("No state parameter provided"))?;
    let code = params
        .get("code")
        .ok_or(HttpError::BadRequest("No code parameter provided"))?;

    let cookie_name = state_cookie_name(&state);
    let cookie = cookies
        .get(&cookie_name)
        .ok_or(HttpError::BadRequest("Missing login state cookie"))?;

    // the state is single use, whatever happens next
    cookies.remove(Cookie::build((cookie_name, "")).path("/").build());

    let login = LoginState::open(cookie.value(), state.auth.key()).map_err(|e| {
        warn!("failed to open login state: {}", e);
        HttpError::BadRequest("Invalid login state")
    })?;

    if !login.verify_csrf(state_param) {
        warn!("login state did not match the state parameter");
        return Err(HttpError::BadRequest("Invalid login state"));
    }

    let session = state
        .auth
        .login(code.clone(), &login.nonce())
        .await
        .map_err(|e| {
            error!("failed to complete login: {}", e);
            HttpError::Internal("Failed to complete login")
        })?;

    cookies.add(
        Cookie::build((state.config.cookie.name.clone(), session.id.to_string()))
            .path("/")
            .http_only(true)
            .secure(!state.config.is_dev())
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(SESSION_TTL.whole_seconds()))
            .build(),
    );

    Ok(Redirect::to(login.redirect()))
}
