use crate::{auth::CurrentSession, error::HttpError, views::DashboardView, ServerState};

use axum::{extract::State, response::Html};
use tracing::error;

#[axum::debug_handler(state = ServerState)]
pub async fn dashboard_handler(
    State(state): State<ServerState>,
    CurrentSession(session): CurrentSession,
) -> Result<Html<String>, HttpError> {
    let view = DashboardView {
        email: session.email.clone(),
        user_id: session.user_id.to_string(),
        roles: session.roles().to_vec(),
    };

    state.views.dashboard.render(&view).map(Html).map_err(|e| {
        error!("failed to render dashboard: {}", e);
        HttpError::Internal("Internal Server Error")
    })
}
