use crate::{auth::CurrentSession, error::HttpError, views::HomeView, ServerState};

use axum::{extract::State, response::Html};
use tracing::error;

#[axum::debug_handler(state = ServerState)]
pub async fn home_handler(
    State(state): State<ServerState>,
    session: Option<CurrentSession>,
) -> Result<Html<String>, HttpError> {
    let view = HomeView {
        email: session
            .map(|CurrentSession(session)| session.email.clone())
            .unwrap_or_default(),
    };

    state.views.home.render(&view).map(Html).map_err(|e| {
        error!("failed to render home page: {}", e);
        HttpError::Internal("Internal Server Error")
    })
}
