//! porch is a starting point for server-rendered web applications
//!
//! porch logs users in with OpenID Connect, keeps their sessions in Postgres
//! and renders pages from templates checked against their view models.

use std::{env::var, sync::Arc, time::Duration};

use anyhow::Context;
use porch::{
    app,
    auth::{spawn_sweeper, AuthService, SWEEP_INTERVAL},
    config::Config,
    db, oidc,
    session::PgStore,
    shutdown,
    views::Views,
    ServerState,
};
use tokio::net::TcpListener;
use tracing::{error, info};

/// How long open connections and background tasks get to finish.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config = Arc::new(Config::try_env().context("invalid configuration")?);

    let mut client = db::connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    db::migrate(&mut client)
        .await
        .context("failed to run migrations")?;
    let store = Arc::new(PgStore::new(Arc::new(client)));

    let oidc_client = oidc::setup_client(&config)
        .await
        .context("failed to set up OIDC")?;
    let views = Views::load(&config).context("failed to load templates")?;

    let auth = AuthService::new(
        oidc_client,
        config.oidc.client_id.clone(),
        store.clone(),
        config.secret_key()?,
    );

    let shutdown = shutdown::Sender::new();
    let sweeper = spawn_sweeper(store, SWEEP_INTERVAL, shutdown.subscribe());

    let state = ServerState {
        config: config.clone(),
        auth: Arc::new(auth),
        views: Arc::new(views),
        shutdown: shutdown.subscribe(),
    };

    let listener = TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("failed to bind {}", config.addr()))?;
    info!("serving on {}", config.addr());

    let mut server_shutdown = shutdown.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app(state))
            .with_graceful_shutdown(async move { server_shutdown.recv().await })
            .await
    });

    shutdown::wait_for_signal().await;
    info!("shutting down");

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown.shutdown())
        .await
        .is_err()
    {
        error!("timed out waiting for tasks to finish");
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("server error: {}", e),
        Err(e) => error!("server task failed: {}", e),
    }
    if let Err(e) = sweeper.await {
        error!("session sweeper failed: {}", e);
    }

    info!("shut down");
    Ok(())
}
