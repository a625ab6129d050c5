//! Attach sessions to requests.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tower_cookies::Cookies;
use tracing::{error, warn};
use url::form_urlencoded;
use uuid::Uuid;

use crate::{auth::SessionData, error::HttpError, ServerState};

/// The session of the logged in user, set by [`optional_auth`].
#[derive(Clone, Debug)]
pub struct CurrentSession(pub Arc<SessionData>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(HttpError::Internal("Missing session"))
    }
}

/// Load the session named by the session cookie, if there is one, refreshing
/// its access token when it has expired.
pub async fn optional_auth(
    State(state): State<ServerState>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    let id = cookies
        .get(&state.config.cookie.name)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());

    if let Some(id) = id {
        match state.auth.get_session(&id).await {
            Ok(Some(mut session)) => {
                if let Err(e) = state.auth.refresh_token(&mut session).await {
                    warn!(session = %id, "failed to refresh access token: {}", e);
                }

                request
                    .extensions_mut()
                    .insert(CurrentSession(Arc::new(session)));
            }
            Ok(None) => {}
            Err(e) => error!(session = %id, "failed to load session: {}", e),
        }
    }

    next.run(request).await
}

/// Send requests without a usable session to the login page, returning to
/// the requested page afterwards.
pub async fn require_auth(request: Request, next: Next) -> Response {
    let usable = request
        .extensions()
        .get::<CurrentSession>()
        .map_or(false, |CurrentSession(session)| !session.token.is_expired());

    if usable {
        return next.run(request).await;
    }

    // nested routers strip their prefix from the request's own uri
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map_or(request.uri(), |OriginalUri(uri)| uri);
    let target = uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("redirect", target)
        .finish();

    Redirect::temporary(&format!("/login?{}", query)).into_response()
}
