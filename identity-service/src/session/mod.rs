//! Server-side session access.
//!
//! Resolution and redirect bookkeeping only need a small key/value view of
//! the session, so they work against [`SessionState`]. Production wires in
//! `tower_sessions::Session`; tests use [`MemorySession`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::AccessToken;

/// Session key holding the token of the identity bound to the session.
pub const IDENTITY_KEY: &str = "identity.token";

/// Session key holding the bounded redirect history.
pub const REDIRECT_HISTORY_KEY: &str = "redirect.history";

#[derive(Error, Debug)]
#[error("Session error: {0}")]
pub struct SessionError(#[from] pub anyhow::Error);

#[async_trait]
pub trait SessionState: Send + Sync {
    /// Session id, once the session has been persisted.
    fn id(&self) -> Option<String>;

    async fn get_value(&self, key: &str) -> Result<Option<Value>, SessionError>;

    async fn insert_value(&self, key: &str, value: Value) -> Result<(), SessionError>;

    async fn remove_value(&self, key: &str) -> Result<(), SessionError>;
}

/// Typed read. A value that no longer deserializes is treated as absent.
pub async fn get<T: DeserializeOwned>(
    session: &dyn SessionState,
    key: &str,
) -> Result<Option<T>, SessionError> {
    let Some(value) = session.get_value(key).await? else {
        return Ok(None);
    };

    match serde_json::from_value(value) {
        Ok(typed) => Ok(Some(typed)),
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding unreadable session value");
            Ok(None)
        }
    }
}

pub async fn insert<T: Serialize>(
    session: &dyn SessionState,
    key: &str,
    value: &T,
) -> Result<(), SessionError> {
    let value = serde_json::to_value(value).map_err(|e| SessionError(e.into()))?;
    session.insert_value(key, value).await
}

/// Token bound to the session, if any.
pub async fn identity(session: &dyn SessionState) -> Result<Option<AccessToken>, SessionError> {
    get(session, IDENTITY_KEY).await
}

pub async fn set_identity(
    session: &dyn SessionState,
    token: &AccessToken,
) -> Result<(), SessionError> {
    insert(session, IDENTITY_KEY, token).await
}

pub async fn clear_identity(session: &dyn SessionState) -> Result<(), SessionError> {
    session.remove_value(IDENTITY_KEY).await
}

#[async_trait]
impl SessionState for tower_sessions::Session {
    fn id(&self) -> Option<String> {
        tower_sessions::Session::id(self).map(|id| id.to_string())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>, SessionError> {
        tower_sessions::Session::get_value(self, key)
            .await
            .map_err(|e| SessionError(e.into()))
    }

    async fn insert_value(&self, key: &str, value: Value) -> Result<(), SessionError> {
        tower_sessions::Session::insert_value(self, key, value)
            .await
            .map(|_| ())
            .map_err(|e| SessionError(e.into()))
    }

    async fn remove_value(&self, key: &str) -> Result<(), SessionError> {
        tower_sessions::Session::remove_value(self, key)
            .await
            .map(|_| ())
            .map_err(|e| SessionError(e.into()))
    }
}

/// In-memory session for tests.
#[derive(Default)]
pub struct MemorySession {
    id: Option<String>,
    pub values: Mutex<HashMap<String, Value>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            values: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, SessionError> {
        self.values
            .lock()
            .map_err(|e| SessionError(anyhow::anyhow!("Session mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl SessionState for MemorySession {
    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn insert_value(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_value(&self, key: &str) -> Result<(), SessionError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
