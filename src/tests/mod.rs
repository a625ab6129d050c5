//! Shared fixtures and tests of the whole router.


use std::sync::Arc;

use openidconnect::{
    core::CoreClient, AuthUrl, ClientId, ClientSecret, IssuerUrl, JsonWebKeySet, RedirectUrl,
    TokenUrl,
};

use crate::{
    auth::AuthService, config::Config, session::memory::MemoryStore, shutdown, views::Views,
    ServerState,
};

pub(crate) const TEST_CONFIG: &str = r#"
    site_url = "http://localhost:8080"
    database_url = "postgres://porch@localhost/porch"
    secret_key = "cHFyc3R1dnd4eXp7fH1+f4CBgoOEhYaHiImKi4yNjo8="

    [oidc]
    issuer_url = "https://id.example.com"
    client_id = "porch"
    client_secret = "secret"
"#;

pub(crate) fn test_config() -> Config {
    Config::from_toml(TEST_CONFIG).expect("valid test config")
}

/// A client for a provider that is never contacted.
pub(crate) fn oidc_client() -> CoreClient {
    CoreClient::new(
        ClientId::new("porch".to_string()),
        Some(ClientSecret::new("secret".to_string())),
        IssuerUrl::new("https://id.example.com".to_string()).expect("issuer"),
        AuthUrl::new("https://id.example.com/auth".to_string()).expect("auth url"),
        Some(TokenUrl::new("https://id.example.com/token".to_string()).expect("token url")),
        None,
        JsonWebKeySet::new(vec![]),
    )
    .set_redirect_uri(RedirectUrl::new("http://localhost/callback".to_string()).expect("redirect"))
}

pub(crate) fn auth_service() -> (AuthService, Arc<MemoryStore>) {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let service = AuthService::new(
        oidc_client(),
        config.oidc.client_id.clone(),
        store.clone(),
        config.secret_key().expect("key"),
    );

    (service, store)
}

/// Server state over an in-memory store. Shutdown begins when the harness is
/// dropped.
pub(crate) struct Harness {
    pub state: ServerState,
    pub store: Arc<MemoryStore>,
    _shutdown: shutdown::Sender,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let (auth, store) = auth_service();
        let shutdown = shutdown::Sender::new();

        let state = ServerState {
            config: Arc::new(config),
            auth: Arc::new(auth),
            views: Arc::new(Views::embedded().expect("templates")),
            shutdown: shutdown.subscribe(),
        };

        Self {
            state,
            store,
            _shutdown: shutdown,
        }
    }

    pub fn app(&self) -> axum::Router {
        crate::app(self.state.clone())
    }
}
