use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tower_sessions::{
    ExpiredDeletion, Session, SessionStore,
    cookie::time::OffsetDateTime,
    session::{Id, Record},
    session_store,
};
use tracing::error;

use crate::{db::user::Role, web::navigation::Route};

/// Session key of the logged in user
pub const SESSION_USER: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }
}

/// The session user, if anyone is logged in
#[derive(Debug, Clone)]
pub struct Auth(pub Option<SessionUser>);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let user = session
            .get::<SessionUser>(SESSION_USER)
            .await
            .map_err(|e| {
                error!("Error reading session user: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "session error")
            })?;
        Ok(Auth(user))
    }
}

/// A logged in user, anonymous requests are sent to the login page
#[derive(Debug, Clone)]
pub struct AuthUser(pub SessionUser);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(Some(user))) => Ok(AuthUser(user)),
            Ok(Auth(None)) => Err(Redirect::to(Route::Login.path()).into_response()),
            Err(rejection) => Err(rejection.into_response()),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct InMemSessionStore(Arc<Mutex<HashMap<Id, Record>>>);

#[async_trait()]
impl SessionStore for InMemSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        let mut sessions = self.0.lock().await;
        while sessions.contains_key(&record.id) {
            record.id = Id::default();
        }
        sessions.insert(record.id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.0.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .0
            .lock()
            .await
            .get(session_id)
            .filter(|record| record.expiry_date > now)
            .cloned())
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.0.lock().await.remove(session_id);
        Ok(())
    }
}

#[async_trait()]
impl ExpiredDeletion for InMemSessionStore {
    async fn delete_expired(&self) -> session_store::Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.0.lock().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.expiry_date >= now);
        tracing::debug!("deleted {} expired sessions", before - sessions.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_sessions::cookie::time::Duration as TimeDuration;

    fn record(expires_in: TimeDuration) -> Record {
        Record {
            id: Id::default(),
            data: Default::default(),
            expiry_date: OffsetDateTime::now_utc() + expires_in,
        }
    }

    #[tokio::test]
    async fn expired_sessions_are_not_loaded() {
        let store = InMemSessionStore::default();
        let mut live = record(TimeDuration::minutes(5));
        let mut expired = record(TimeDuration::minutes(-5));
        store.create(&mut live).await.unwrap();
        store.create(&mut expired).await.unwrap();

        assert!(store.load(&live.id).await.unwrap().is_some());
        assert!(store.load(&expired.id).await.unwrap().is_none());

        store.delete_expired().await.unwrap();
        assert_eq!(store.0.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn session_user_uses_type_key() {
        let store = Arc::new(InMemSessionStore::default());
        let session = Session::new(None, store, None);
        let user = SessionUser {
            role: Role::Employee,
            email: Some("a@a".to_string()),
        };
        session.insert(SESSION_USER, &user).await.unwrap();

        let raw = session
            .get_value(SESSION_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw["type"], "Employee");
        assert_eq!(raw["email"], "a@a");
        assert_eq!(
            session.get::<SessionUser>(SESSION_USER).await.unwrap(),
            Some(user)
        );
    }

    #[test]
    fn email_is_optional() {
        let user = SessionUser {
            role: Role::Admin,
            email: None,
        };
        assert!(user.is_admin());
        assert_eq!(user.email(), "");
    }
}
