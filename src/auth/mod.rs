//! Sessions of logged in users.
//!
//! A session row holds the OAuth tokens of a login sealed with the server's
//! key and bound to the session's id, so neither a database dump nor a row
//! copied to another session yields usable tokens.

pub mod middleware;

use std::sync::Arc;

use openidconnect::{
    core::{CoreClient, CoreTokenResponse, CoreTokenType},
    reqwest::async_http_client,
    AuthorizationCode, Nonce, OAuth2TokenResponse, RefreshToken, TokenResponse,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    oidc::extract_roles,
    seal::{claims, Claims, ClaimsValidator, SealError, SealKey},
    session::{NewUser, SessionRecord, SessionStore, StoreError, User},
    shutdown,
};

pub use middleware::{optional_auth, require_auth, CurrentSession};

/// How long a session lasts after logging in.
pub const SESSION_TTL: Duration = Duration::hours(24);

/// How often expired sessions are deleted.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to seal token data: {0}")]
    Seal(#[from] SealError),
    #[error("invalid token data: {0}")]
    Claims(#[from] claims::Error),
    #[error("failed to exchange authorization code: {0}")]
    Exchange(String),
    #[error("token response did not include an ID token")]
    MissingIdToken,
    #[error("failed to verify ID token: {0}")]
    IdToken(String),
    #[error("access token expired and no refresh token is available")]
    NoRefreshToken,
    #[error("failed to refresh access token: {0}")]
    Refresh(String),
}

/// OAuth tokens of a session, stored sealed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TokenData {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    /// Expiry of the access token in unix seconds, if it has one.
    pub expiry: Option<i64>,
    pub roles: Vec<String>,
}

impl TokenData {
    fn from_response(response: &CoreTokenResponse, roles: Vec<String>) -> Self {
        let expiry = response.expires_in().and_then(|expires_in| {
            let expires_in = Duration::try_from(expires_in).ok()?;
            Some((OffsetDateTime::now_utc() + expires_in).unix_timestamp())
        });

        Self {
            access_token: response.access_token().secret().clone(),
            token_type: token_type_name(response.token_type()),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expiry,
            roles,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry
            .map_or(false, |expiry| expiry <= OffsetDateTime::now_utc().unix_timestamp())
    }
}

fn token_type_name(token_type: &CoreTokenType) -> String {
    match token_type {
        CoreTokenType::Bearer => "Bearer".to_string(),
        CoreTokenType::Mac => "MAC".to_string(),
        CoreTokenType::Extension(other) => other.clone(),
    }
}

/// A loaded session along with its user.
#[derive(Clone, Debug)]
pub struct SessionData {
    pub id: Uuid,
    pub token: TokenData,
    pub id_token: String,
    /// The user's subject at the OIDC provider.
    pub subject: String,
    /// The user's id in the database.
    pub user_id: i64,
    pub email: String,
    pub display_name: String,
    pub expires: OffsetDateTime,
}

impl SessionData {
    pub fn roles(&self) -> &[String] {
        &self.token.roles
    }
}

#[derive(Debug)]
pub struct AuthService {
    client: CoreClient,
    store: Arc<dyn SessionStore>,
    key: SealKey,
    client_id: String,
}

impl AuthService {
    pub fn new(
        client: CoreClient,
        client_id: String,
        store: Arc<dyn SessionStore>,
        key: SealKey,
    ) -> Self {
        Self {
            client,
            store,
            key,
            client_id,
        }
    }

    pub fn client(&self) -> &CoreClient {
        &self.client
    }

    pub fn key(&self) -> &SealKey {
        &self.key
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn seal_token(&self, id: &Uuid, token: &TokenData, expires: OffsetDateTime) -> Result<String, AuthError> {
        let claims = Claims::expiring_at(expires).with_custom_claim("token", token)?;
        Ok(self.key.seal(&claims, id.as_bytes())?)
    }

    fn open_token(&self, id: &Uuid, sealed: &str) -> Result<TokenData, AuthError> {
        let claims = self.key.open(sealed, &ClaimsValidator::new(), id.as_bytes())?;
        Ok(claims.claim("token")?)
    }

    /// Load a session. Expired and unknown sessions are [`None`].
    pub async fn get_session(&self, id: &Uuid) -> Result<Option<SessionData>, AuthError> {
        let Some(record) = self.store.get_session(id).await? else {
            return Ok(None);
        };
        if record.expires_at <= OffsetDateTime::now_utc() {
            return Ok(None);
        }

        let Some(user) = self.store.get_user(record.user_id).await? else {
            return Ok(None);
        };
        let token = self.open_token(id, &record.token_data)?;

        Ok(Some(SessionData {
            id: record.id,
            token,
            id_token: record.id_token,
            subject: user.auth_sub,
            user_id: user.id,
            email: user.email,
            display_name: user.display_name,
            expires: record.expires_at,
        }))
    }

    /// Start a new session for `user`.
    pub async fn create_session(
        &self,
        user: &User,
        token: TokenData,
        id_token: String,
    ) -> Result<SessionData, AuthError> {
        let id = Uuid::new_v4();
        let expires = OffsetDateTime::now_utc() + SESSION_TTL;

        self.store
            .create_session(&SessionRecord {
                id,
                user_id: user.id,
                token_data: self.seal_token(&id, &token, expires)?,
                id_token: id_token.clone(),
                expires_at: expires,
            })
            .await?;

        Ok(SessionData {
            id,
            token,
            id_token,
            subject: user.auth_sub.clone(),
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            expires,
        })
    }

    pub async fn delete_session(&self, id: &Uuid) -> Result<(), AuthError> {
        Ok(self.store.delete_session(id).await?)
    }

    /// Refresh the access token of a session if it has expired.
    pub async fn refresh_token(&self, session: &mut SessionData) -> Result<(), AuthError> {
        if !session.token.is_expired() {
            return Ok(());
        }

        let refresh_token = session
            .token
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        let mut token = TokenData::from_response(&response, session.token.roles.clone());
        // providers may not rotate refresh tokens
        token.refresh_token.get_or_insert(refresh_token);

        let sealed = self.seal_token(&session.id, &token, session.expires)?;
        self.store.update_session_token(&session.id, &sealed).await?;

        debug!(session = %session.id, "refreshed access token");
        session.token = token;

        Ok(())
    }

    /// Finish a login: exchange the authorization code, verify the ID token
    /// against `nonce`, record the user and start a session.
    pub async fn login(&self, code: String, nonce: &Nonce) -> Result<SessionData, AuthError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let id_token = response
            .id_token()
            .ok_or(AuthError::MissingIdToken)?;
        let claims = id_token
            .claims(&self.client.id_token_verifier(), nonce)
            .map_err(|e| AuthError::IdToken(e.to_string()))?;

        let raw_id_token = id_token.to_string();
        let email = claims
            .email()
            .map(|email| email.as_str().to_string())
            .unwrap_or_default();
        let display_name = claims
            .name()
            .and_then(|name| name.get(None))
            .map(|name| name.as_str().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| email.clone());

        let user = self
            .store
            .upsert_user(NewUser {
                auth_sub: claims.subject().as_str().to_string(),
                email,
                display_name,
            })
            .await?;

        let roles = extract_roles(&raw_id_token, &self.client_id);
        let token = TokenData::from_response(&response, roles);

        let session = self.create_session(&user, token, raw_id_token).await?;
        info!(user = user.id, "user logged in");

        Ok(session)
    }
}

/// Delete expired sessions every `every` until shutdown.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    every: std::time::Duration,
    mut shutdown: shutdown::Receiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

        loop {
            tokio::select! {
                _ = interval.tick() => match store.delete_expired_sessions().await {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "deleted expired sessions"),
                    Err(e) => error!("failed to delete expired sessions: {}", e),
                },
                _ = shutdown.recv() => break,
            }
        }

        debug!("session sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::MemoryStore;

    fn token(expiry: Option<i64>, refresh: Option<&str>) -> TokenData {
        TokenData {
            access_token: "access".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: refresh.map(str::to_string),
            expiry,
            roles: vec!["admin".to_string()],
        }
    }

    async fn user(service: &AuthService) -> User {
        service
            .store()
            .upsert_user(NewUser {
                auth_sub: "sub-1".to_string(),
                email: "ann@example.com".to_string(),
                display_name: "Ann".to_string(),
            })
            .await
            .expect("user")
    }

    #[tokio::test]
    async fn sessions_round_trip() {
        let (service, store) = crate::tests::auth_service();
        let user = user(&service).await;

        let created = service
            .create_session(&user, token(None, None), "id-token".to_string())
            .await
            .expect("create");

        let loaded = service
            .get_session(&created.id)
            .await
            .expect("load")
            .expect("session exists");
        assert_eq!(loaded.token, created.token);
        assert_eq!(loaded.email, "ann@example.com");
        assert_eq!(loaded.subject, "sub-1");
        assert_eq!(loaded.roles(), ["admin".to_string()]);

        // the blob is sealed, not stored in the clear
        let record = store.get_session(&created.id).await.expect("get").expect("record");
        assert!(record.token_data.starts_with("v4.local."));
        assert!(!record.token_data.contains("access"));

        service.delete_session(&created.id).await.expect("delete");
        assert!(service.get_session(&created.id).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn sealed_tokens_are_bound_to_their_session() {
        let (service, store) = crate::tests::auth_service();
        let user = user(&service).await;

        let first = service
            .create_session(&user, token(None, None), String::new())
            .await
            .expect("create");
        let second = service
            .create_session(&user, token(None, None), String::new())
            .await
            .expect("create");

        let stolen = store.get_session(&first.id).await.expect("get").expect("record");
        store
            .update_session_token(&second.id, &stolen.token_data)
            .await
            .expect("update");

        assert!(matches!(
            service.get_session(&second.id).await,
            Err(AuthError::Seal(SealError::AuthFailure))
        ));
    }

    #[tokio::test]
    async fn expired_sessions_are_ignored() {
        let (service, store) = crate::tests::auth_service();
        let user = user(&service).await;

        let id = Uuid::new_v4();
        store
            .create_session(&SessionRecord {
                id,
                user_id: user.id,
                token_data: "irrelevant".to_string(),
                id_token: String::new(),
                expires_at: OffsetDateTime::now_utc() - Duration::minutes(1),
            })
            .await
            .expect("create");

        assert!(service.get_session(&id).await.expect("load").is_none());
        assert!(service.get_session(&Uuid::new_v4()).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn refresh_without_refresh_token() {
        let (service, _) = crate::tests::auth_service();
        let user = user(&service).await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let mut fresh = service
            .create_session(&user, token(Some(now + 600), None), String::new())
            .await
            .expect("create");
        service.refresh_token(&mut fresh).await.expect("nothing to refresh");

        let mut stale = service
            .create_session(&user, token(Some(now - 1), None), String::new())
            .await
            .expect("create");
        assert!(stale.token.is_expired());
        assert!(matches!(
            service.refresh_token(&mut stale).await,
            Err(AuthError::NoRefreshToken)
        ));
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = shutdown::Sender::new();

        let handle = spawn_sweeper(store, SWEEP_INTERVAL, shutdown.subscribe());
        shutdown.shutdown().await;

        handle.await.expect("sweeper exits cleanly");
    }
}
