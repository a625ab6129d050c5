//! # porch
//!
//! porch is a starting point for server-rendered web applications
//!
//! ## About
//!
//! Users log in with an OpenID Connect provider. Their sessions live in
//! Postgres, with the provider's tokens sealed in a [PASETO v4] local token
//! bound to the session. Pages are Go-style HTML templates whose fields are
//! checked against typed view models at startup, and logged in users get a
//! Server-Sent Events stream.
//!
//! [PASETO v4]: https://github.com/paseto-standard/paseto-spec

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod oidc;
mod routes;
pub mod seal;
pub mod session;
pub mod shutdown;
pub mod sse;
pub mod template;
pub mod views;

#[cfg(test)]
mod tests;

pub use routes::{routes, url_for};

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;

#[derive(Debug, Clone)]
pub struct ServerState {
    pub config: Arc<config::Config>,
    pub auth: Arc<auth::AuthService>,
    pub views: Arc<views::Views>,

    // Signals back to the main thread when dropped
    pub shutdown: shutdown::Receiver,
}

/// The whole app, ready to serve.
pub fn app(state: ServerState) -> Router {
    routes(&state.config)
        .layer(from_fn_with_state(state.clone(), auth::optional_auth))
        .layer(from_fn(middleware::cross_origin_protection))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(LatencyUnit::Micros),
                        ),
                )
                .layer(CatchPanicLayer::new())
                .layer(CookieManagerLayer::new())
                .layer(from_fn(middleware::no_cache))
                .layer(from_fn(middleware::security_headers)),
        )
}
