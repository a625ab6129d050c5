//! Users and sessions.
//!
//! The store only moves records in and out of the database; sealing the
//! token blob and deciding when a session is valid happen in
//! [`crate::auth`].

#[cfg(test)]
pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("no session with id {0}")]
    NoSession(Uuid),
}

/// A user, keyed by the subject the OIDC provider knows them as.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: i64,
    pub auth_sub: String,
    pub email: String,
    pub display_name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub auth_sub: String,
    pub email: String,
    pub display_name: String,
}

/// A stored session. `token_data` is the sealed token blob.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub token_data: String,
    pub id_token: String,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait SessionStore: fmt::Debug + Send + Sync {
    /// Insert a user, or update the email and display name of an existing
    /// one with the same subject.
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn create_session(&self, session: &SessionRecord) -> Result<(), StoreError>;

    async fn get_session(&self, id: &Uuid) -> Result<Option<SessionRecord>, StoreError>;

    /// Replace the token blob of a session.
    async fn update_session_token(&self, id: &Uuid, token_data: &str) -> Result<(), StoreError>;

    async fn delete_session(&self, id: &Uuid) -> Result<(), StoreError>;

    /// Delete every session past its expiry, returning how many were deleted.
    async fn delete_expired_sessions(&self) -> Result<u64, StoreError>;
}
