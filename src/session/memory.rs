use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::session::{NewUser, SessionRecord, SessionStore, StoreError, User};

/// A store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    users: Vec<User>,
    sessions: HashMap<Uuid, SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = inner.users.iter_mut().find(|u| u.auth_sub == user.auth_sub) {
            existing.email = user.email;
            existing.display_name = user.display_name;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = User {
            id: inner.users.len() as i64 + 1,
            auth_sub: user.auth_sub,
            email: user.email,
            display_name: user.display_name,
            created_at: now,
            updated_at: now,
        };
        inner.users.push(created.clone());

        Ok(created)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    async fn create_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<SessionRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(id).cloned())
    }

    async fn update_session_token(&self, id: &Uuid, token_data: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or(StoreError::NoSession(*id))?;
        session.token_data = token_data.to_string();
        Ok(())
    }

    async fn delete_session(&self, id: &Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(id);
        Ok(())
    }

    async fn delete_expired_sessions(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.expires_at >= now);

        Ok((before - inner.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn record(user_id: i64, expires_at: OffsetDateTime) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            user_id,
            token_data: "sealed".to_string(),
            id_token: "id".to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_ids() {
        let store = MemoryStore::new();
        let new_user = |email: &str| NewUser {
            auth_sub: "sub-1".to_string(),
            email: email.to_string(),
            display_name: "Ann".to_string(),
        };

        let first = store.upsert_user(new_user("a@example.com")).await.expect("insert");
        let second = store.upsert_user(new_user("b@example.com")).await.expect("update");

        assert_eq!(first.id, second.id);
        assert_eq!(
            store.get_user(first.id).await.expect("get").map(|u| u.email),
            Some("b@example.com".to_string())
        );
        assert_eq!(store.get_user(99).await.expect("get"), None);
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        let live = record(1, now + Duration::hours(1));
        let expired = record(1, now - Duration::hours(1));

        store.create_session(&live).await.expect("create");
        store.create_session(&expired).await.expect("create");

        store
            .update_session_token(&live.id, "resealed")
            .await
            .expect("update");
        assert_eq!(
            store.get_session(&live.id).await.expect("get").map(|s| s.token_data),
            Some("resealed".to_string())
        );
        assert!(matches!(
            store.update_session_token(&Uuid::new_v4(), "x").await,
            Err(StoreError::NoSession(_))
        ));

        assert_eq!(store.delete_expired_sessions().await.expect("sweep"), 1);
        assert_eq!(store.session_count().await, 1);

        store.delete_session(&live.id).await.expect("delete");
        assert_eq!(store.get_session(&live.id).await.expect("get"), None);
    }
}
