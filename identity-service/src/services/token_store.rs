use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{AccessToken, AccessTokenRow, TerminationSource, TokenSource};
use crate::models::access_token::truncate_to_seconds;
use crate::services::error::StoreError;

/// Persistent record of issued access tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Issue and persist a new token. It is not live until this returns `Ok`.
    async fn create(&self, user_id: Uuid, source: TokenSource) -> Result<AccessToken, StoreError>;

    /// Newest token for the subject that has not yet expired.
    async fn find_by_subject(&self, user_id: Uuid) -> Result<Option<AccessToken>, StoreError>;

    async fn find_by_value(&self, token_value: &str) -> Result<Option<AccessToken>, StoreError>;

    /// Move the expiry to `min(current, at)` and record why. Idempotent.
    async fn expire(
        &self,
        token: &AccessToken,
        source: TerminationSource,
        at: DateTime<Utc>,
    ) -> Result<AccessToken, StoreError>;
}

const TOKEN_COLUMNS: &str = "token_id, user_id, token_value, source_code, created_utc, expiry_utc, termination_code, terminated_utc";

/// Postgres-backed token store.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
    grant: Duration,
}

impl PgTokenStore {
    pub fn new(pool: PgPool, grant: Duration) -> Self {
        Self { pool, grant }
    }
}

fn into_token(row: AccessTokenRow) -> Result<AccessToken, StoreError> {
    AccessToken::try_from(row).map_err(|e| StoreError::Persistence(anyhow::anyhow!(e)))
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        crate::db::ping(&self.pool).await
    }

    async fn create(&self, user_id: Uuid, source: TokenSource) -> Result<AccessToken, StoreError> {
        let token = AccessToken::issue(user_id, source, self.grant);

        sqlx::query(
            r#"
            INSERT INTO access_tokens (token_id, user_id, token_value, source_code, created_utc, expiry_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_value)
        .bind(token.source.as_str())
        .bind(token.created_utc)
        .bind(token.expiry_utc)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            token_id = %token.token_id,
            source = token.source.as_str(),
            "Access token created"
        );

        Ok(token)
    }

    async fn find_by_subject(&self, user_id: Uuid) -> Result<Option<AccessToken>, StoreError> {
        let row = sqlx::query_as::<_, AccessTokenRow>(&format!(
            "SELECT {} FROM access_tokens WHERE user_id = $1 AND expiry_utc > NOW() ORDER BY created_utc DESC LIMIT 1",
            TOKEN_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_token).transpose()
    }

    async fn find_by_value(&self, token_value: &str) -> Result<Option<AccessToken>, StoreError> {
        let row = sqlx::query_as::<_, AccessTokenRow>(&format!(
            "SELECT {} FROM access_tokens WHERE token_value = $1",
            TOKEN_COLUMNS
        ))
        .bind(token_value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_token).transpose()
    }

    async fn expire(
        &self,
        token: &AccessToken,
        source: TerminationSource,
        at: DateTime<Utc>,
    ) -> Result<AccessToken, StoreError> {
        let at = truncate_to_seconds(at);

        let row = sqlx::query_as::<_, AccessTokenRow>(&format!(
            r#"
            UPDATE access_tokens
            SET expiry_utc = LEAST(expiry_utc, $2), termination_code = $3, terminated_utc = $2
            WHERE token_id = $1
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        ))
        .bind(token.token_id)
        .bind(at)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::Persistence(anyhow::anyhow!("Token {} not found", token.token_id))
        })?;

        tracing::info!(
            token_id = %token.token_id,
            termination = source.as_str(),
            "Access token expired"
        );

        into_token(row)
    }
}

/// In-memory token store for tests and local runs.
pub struct MemoryTokenStore {
    grant: Duration,
    pub tokens: Mutex<HashMap<Uuid, AccessToken>>,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new(Duration::days(90))
    }
}

impl MemoryTokenStore {
    pub fn new(grant: Duration) -> Self {
        Self {
            grant,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Store a token as-is, bypassing issuance.
    pub fn insert(&self, token: AccessToken) -> Result<(), StoreError> {
        self.lock()?.insert(token.token_id, token);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, AccessToken>>, StoreError> {
        self.tokens
            .lock()
            .map_err(|e| StoreError::Persistence(anyhow::anyhow!("Token store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn create(&self, user_id: Uuid, source: TokenSource) -> Result<AccessToken, StoreError> {
        let token = AccessToken::issue(user_id, source, self.grant);
        self.lock()?.insert(token.token_id, token.clone());
        Ok(token)
    }

    async fn find_by_subject(&self, user_id: Uuid) -> Result<Option<AccessToken>, StoreError> {
        let now = Utc::now();
        let newest = self
            .lock()?
            .values()
            .filter(|t| t.user_id == user_id && !t.is_expired_at(now))
            .max_by_key(|t| t.created_utc)
            .cloned();
        Ok(newest)
    }

    async fn find_by_value(&self, token_value: &str) -> Result<Option<AccessToken>, StoreError> {
        let found = self
            .lock()?
            .values()
            .find(|t| t.token_value == token_value)
            .cloned();
        Ok(found)
    }

    async fn expire(
        &self,
        token: &AccessToken,
        source: TerminationSource,
        at: DateTime<Utc>,
    ) -> Result<AccessToken, StoreError> {
        let mut tokens = self.lock()?;
        let stored = tokens.get_mut(&token.token_id).ok_or_else(|| {
            StoreError::Persistence(anyhow::anyhow!("Token {} not found", token.token_id))
        })?;
        stored.expire(source, at);
        Ok(stored.clone())
    }
}
