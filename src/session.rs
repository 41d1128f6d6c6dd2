use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::errors::ConciergeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub issued_at: String,
}

/// Login sessions keyed by browser id. One store is built at start-up and
/// shared by reference.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Issues a fresh token, replacing any session held by `browser_id`.
    async fn issue(&self, user_id: &str, username: &str, browser_id: &str) -> Result<String, ConciergeError>;

    /// Returns the session only when `token` matches the one issued to `browser_id`.
    async fn lookup(&self, browser_id: &str, token: &str) -> Result<Option<SessionRecord>, ConciergeError>;

    async fn revoke(&self, browser_id: &str) -> Result<(), ConciergeError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn issue(&self, user_id: &str, username: &str, browser_id: &str) -> Result<String, ConciergeError> {
        if browser_id.trim().is_empty() || user_id.trim().is_empty() {
            return Err(ConciergeError::validation(
                "browser_id and user_id are required to issue a session",
            ));
        }
        let record = SessionRecord {
            token: new_token(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            issued_at: chrono::Utc::now().to_rfc3339(),
        };
        let token = record.token.clone();
        self.sessions
            .write()
            .await
            .insert(browser_id.to_string(), record);
        Ok(token)
    }

    async fn lookup(&self, browser_id: &str, token: &str) -> Result<Option<SessionRecord>, ConciergeError> {
        if token.is_empty() {
            return Ok(None);
        }
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(browser_id)
            .filter(|record| bool::from(record.token.as_bytes().ct_eq(token.as_bytes())))
            .cloned())
    }

    async fn revoke(&self, browser_id: &str) -> Result<(), ConciergeError> {
        self.sessions.write().await.remove(browser_id);
        Ok(())
    }
}
