use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use crate::session::{NewUser, SessionRecord, SessionStore, StoreError, User};

const USER_COLUMNS: &str = "id, auth_sub, email, display_name, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, user_id, token_data, id_token, expires_at";

/// Sessions and users in Postgres.
#[derive(Clone, Debug)]
pub struct PgStore {
    client: Arc<Client>,
}

impl PgStore {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

fn user_from_row(row: &Row) -> Result<User, tokio_postgres::Error> {
    Ok(User {
        id: row.try_get("id")?,
        auth_sub: row.try_get("auth_sub")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &Row) -> Result<SessionRecord, tokio_postgres::Error> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_data: row.try_get("token_data")?,
        id_token: row.try_get("id_token")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl SessionStore for PgStore {
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO users (auth_sub, email, display_name)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (auth_sub) DO UPDATE
                     SET email = EXCLUDED.email,
                         display_name = EXCLUDED.display_name,
                         updated_at = now()
                     RETURNING {USER_COLUMNS}"
                ),
                &[&user.auth_sub, &user.email, &user.display_name],
            )
            .await?;

        Ok(user_from_row(&row)?)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
                &[&id],
            )
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn create_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.client
            .execute(
                &format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"),
                &[
                    &session.id,
                    &session.user_id,
                    &session.token_data,
                    &session.id_token,
                    &session.expires_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<SessionRecord>, StoreError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"),
                &[id],
            )
            .await?;

        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn update_session_token(&self, id: &Uuid, token_data: &str) -> Result<(), StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE sessions SET token_data = $2 WHERE id = $1",
                &[id, &token_data],
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::NoSession(*id));
        }

        Ok(())
    }

    async fn delete_session(&self, id: &Uuid) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM sessions WHERE id = $1", &[id])
            .await?;

        Ok(())
    }

    async fn delete_expired_sessions(&self) -> Result<u64, StoreError> {
        Ok(self
            .client
            .execute("DELETE FROM sessions WHERE expires_at < now()", &[])
            .await?)
    }
}
