//! Helper functions for performing the OIDC flow.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use openidconnect::{
    core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata},
    reqwest::async_http_client,
    ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, RedirectUrl, Scope,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::error;
use url::Url;

use crate::{
    config::Config,
    seal::{Claims, ClaimsValidator, SealError, SealKey},
};

/// How long a login may take between redirecting to the provider and the
/// callback.
const LOGIN_STATE_TTL: Duration = Duration::minutes(5);

/// Binds sealed login state to its purpose, so no other sealed value can be
/// passed off as one.
const LOGIN_STATE_PURPOSE: &[u8] = b"porch login state";

/// Roles every Keycloak user has, which carry no meaning for the app.
const DEFAULT_ROLES: [&str; 2] = ["offline_access", "uma_authorization"];

/// Errors while setting up OIDC.
#[derive(Error, Clone, Debug)]
pub enum SetupError {
    #[error("invalid issuer url")]
    InvalidIssuer,
    #[error("invalid redirect url")]
    InvalidRedirect,
    #[error("error during OIDC discovery")]
    DiscoveryError,
}

/// Discover the provider and build a client that redirects back to
/// `/callback` on the site.
pub async fn setup_client(config: &Config) -> Result<CoreClient, SetupError> {
    let issuer_url = IssuerUrl::new(config.oidc.issuer_url.clone()).map_err(|e| {
        error!("error setting up issuer url: {}", e);
        SetupError::InvalidIssuer
    })?;

    let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, async_http_client)
        .await
        .map_err(|e| {
            error!("failed OIDC discovery: {}", e);
            SetupError::DiscoveryError
        })?;

    let mut redirect_url = config.site_url.clone();
    redirect_url.set_path("callback");

    Ok(CoreClient::from_provider_metadata(
        provider_metadata,
        ClientId::new(config.oidc.client_id.clone()),
        Some(ClientSecret::new(config.oidc.client_secret.clone())),
    )
    .set_redirect_uri(RedirectUrl::new(redirect_url.into()).map_err(|e| {
        error!("invalid redirect url: {}", e);
        SetupError::InvalidRedirect
    })?))
}

/// State carried through the provider's login page in a sealed cookie.
#[derive(Clone, Debug, PartialEq)]
pub struct LoginState {
    csrf: String,
    nonce: String,
    redirect: String,
}

impl LoginState {
    /// Start a login that returns to `redirect` once complete.
    pub fn new(redirect: &str) -> Self {
        Self {
            csrf: CsrfToken::new_random().secret().clone(),
            nonce: Nonce::new_random().secret().clone(),
            redirect: redirect.to_string(),
        }
    }

    pub fn redirect(&self) -> &str {
        &self.redirect
    }

    pub fn nonce(&self) -> Nonce {
        Nonce::new(self.nonce.clone())
    }

    /// Compare the `state` parameter returned by the provider in constant
    /// time.
    pub fn verify_csrf(&self, state: &str) -> bool {
        self.csrf.as_bytes().ct_eq(state.as_bytes()).into()
    }

    /// The provider's authorization URL for this login.
    pub fn authorize_url(&self, client: &CoreClient) -> Url {
        let csrf = self.csrf.clone();
        let nonce = self.nonce.clone();

        let (url, _, _) = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || CsrfToken::new(csrf),
                move || Nonce::new(nonce),
            )
            .add_scope(Scope::new("profile".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .url();

        url
    }

    /// Seal the state for the login cookie.
    pub fn seal(&self, key: &SealKey) -> Result<String, SealError> {
        let claims = Claims::expiring_at(OffsetDateTime::now_utc() + LOGIN_STATE_TTL)
            .with_custom_claim("csrf", &self.csrf)
            .and_then(|c| c.with_custom_claim("nonce", &self.nonce))
            .and_then(|c| c.with_custom_claim("redirect", &self.redirect))
            .map_err(|e| {
                error!("error generating login state claims: {}", e);
                SealError::EncodeError
            })?;

        key.seal(&claims, LOGIN_STATE_PURPOSE)
    }

    /// Open a sealed login cookie. Fails if it was tampered with or has
    /// expired.
    pub fn open(token: &str, key: &SealKey) -> Result<Self, SealError> {
        let claims = key.open(token, &ClaimsValidator::new(), LOGIN_STATE_PURPOSE)?;
        let claim = |name| claims.claim::<String>(name).map_err(|_| SealError::BadClaims);

        Ok(Self {
            csrf: claim("csrf")?,
            nonce: claim("nonce")?,
            redirect: claim("redirect")?,
        })
    }
}

/// Whether a redirect target stays on this site.
pub fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

#[derive(Deserialize, Default)]
struct RoleClaims {
    #[serde(default)]
    realm_access: Access,
    #[serde(default)]
    resource_access: HashMap<String, Access>,
}

#[derive(Deserialize, Default)]
struct Access {
    #[serde(default)]
    roles: Vec<String>,
}

/// Collect the realm roles and the roles for `client_id` from a raw ID
/// token, using the claim layout of Keycloak. Other providers yield no
/// roles.
///
/// The token must already have been verified.
pub fn extract_roles(id_token: &str, client_id: &str) -> Vec<String> {
    let claims = id_token
        .split('.')
        .nth(1)
        .and_then(|payload| URL_SAFE_NO_PAD.decode(payload).ok())
        .and_then(|json| serde_json::from_slice::<RoleClaims>(&json).ok())
        .unwrap_or_default();

    let client_roles = claims
        .resource_access
        .get(client_id)
        .map(|access| access.roles.as_slice())
        .unwrap_or_default();

    claims
        .realm_access
        .roles
        .iter()
        .chain(client_roles)
        .filter(|role| !is_default_role(role))
        .cloned()
        .collect()
}

fn is_default_role(role: &str) -> bool {
    role.starts_with("default-roles-") || DEFAULT_ROLES.contains(&role)
}

/// Where to send the browser after logging out: the provider's end session
/// endpoint when one is configured, otherwise the home page.
pub fn logout_redirect(config: &Config, id_token: Option<&str>) -> String {
    let Some(logout_url) = &config.oidc.logout_url else {
        return "/".to_string();
    };

    let mut url = logout_url.clone();
    {
        let mut query = url.query_pairs_mut();
        if let Some(id_token) = id_token {
            query.append_pair("id_token_hint", id_token);
        }
        query.append_pair("post_logout_redirect_uri", config.site_url.as_str());
    }

    url.into()
}
