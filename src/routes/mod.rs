mod callback;
mod dashboard;
mod events;
mod home;
mod login;
mod logout;

use crate::{auth::require_auth, config::Config, ServerState};
use callback::callback_handler;
use dashboard::dashboard_handler;
use events::time_handler;
use home::home_handler;
use login::login_handler;
use logout::logout_handler;

use axum::{
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post, Router},
};
use tower_http::services::ServeDir;

/// Where to go after logging in when no page was requested.
pub const DEFAULT_REDIRECT: &str = "/u/dashboard";

/// Routes templates can link to with the `url` function.
pub const NAMED_ROUTES: [(&str, &str); 5] = [
    ("index", "/"),
    ("login", "/login"),
    ("logout", "/logout"),
    ("dashboard", "/u/dashboard"),
    ("time", "/u/events/time"),
];

pub fn routes(config: &Config) -> Router<ServerState> {
    let user = Router::new()
        .route("/dashboard", get(dashboard_handler))
        .route("/events/time", get(time_handler))
        .route_layer(from_fn(require_auth));

    Router::new()
        .route("/", get(home_handler))
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .route("/logout", post(logout_handler))
        .route("/ping", get(ping_handler))
        .nest("/u", user)
        .nest_service(
            "/static",
            ServeDir::new(&config.static_dir).append_index_html_on_directories(false),
        )
}

/// Build the path of a named route, filling `{param}` placeholders from
/// name/value pairs.
pub fn url_for(name: &str, pairs: &[String]) -> Result<String, String> {
    let (_, path) = NAMED_ROUTES
        .iter()
        .find(|(route, _)| *route == name)
        .ok_or_else(|| format!("route {:?} not found", name))?;

    if pairs.len() % 2 != 0 {
        return Err(format!("odd number of parameters for route {:?}", name));
    }

    let mut path = path.to_string();
    for pair in pairs.chunks(2) {
        let placeholder = format!("{{{}}}", pair[0]);
        if !path.contains(&placeholder) {
            return Err(format!("route {:?} has no parameter {:?}", name, pair[0]));
        }
        path = path.replace(&placeholder, &pair[1]);
    }

    if path.contains('{') {
        return Err(format!("missing parameters for route {:?}", name));
    }

    Ok(path)
}

#[axum::debug_handler(state = ServerState)]
async fn ping_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_routes() {
        assert_eq!(url_for("dashboard", &[]), Ok("/u/dashboard".to_string()));
        assert_eq!(url_for("index", &[]), Ok("/".to_string()));
        assert!(url_for("nope", &[]).is_err());
        assert!(url_for("login", &["id".to_string()]).is_err());
        assert!(url_for("login", &["id".to_string(), "1".to_string()]).is_err());
    }
}
