use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{PasswordIdentity, User};
use crate::services::error::StoreError;

/// Read access to users and their password identities.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// All identities matching username and domain, compared case-insensitively.
    async fn find_password_identities(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Vec<PasswordIdentity>, StoreError>;

    /// Persist a new user with its password identity.
    async fn create_user(
        &self,
        user: &User,
        identity: &PasswordIdentity,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, username, domain, display_name, created_utc FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_password_identities(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Vec<PasswordIdentity>, StoreError> {
        let identities = sqlx::query_as::<_, PasswordIdentity>(
            r#"
            SELECT ident_id, user_id, username, domain, password_hash, created_utc
            FROM user_identities
            WHERE LOWER(username) = LOWER($1) AND LOWER(domain) = LOWER($2)
            "#,
        )
        .bind(username)
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;

        Ok(identities)
    }

    async fn create_user(
        &self,
        user: &User,
        identity: &PasswordIdentity,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent signups for the same login.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext(LOWER($1) || '@' || LOWER($2)))")
            .bind(&identity.username)
            .bind(&identity.domain)
            .execute(&mut *tx)
            .await?;

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_identities WHERE LOWER(username) = LOWER($1) AND LOWER(domain) = LOWER($2))",
        )
        .bind(&identity.username)
        .bind(&identity.domain)
        .fetch_one(&mut *tx)
        .await?;

        if taken {
            return Err(StoreError::AlreadyExists(format!(
                "Username {} is already registered",
                identity.username
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, domain, display_name, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.domain)
        .bind(&user.display_name)
        .bind(user.created_utc)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_identities (ident_id, user_id, username, domain, password_hash, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(identity.ident_id)
        .bind(identity.user_id)
        .bind(&identity.username)
        .bind(&identity.domain)
        .bind(&identity.password_hash)
        .bind(identity.created_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(user_id = %user.user_id, "User created");
        Ok(())
    }
}

/// In-memory user directory for tests and local runs.
#[derive(Default)]
pub struct MemoryUserDirectory {
    pub users: Mutex<Vec<User>>,
    pub identities: Mutex<Vec<PasswordIdentity>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) -> Result<(), StoreError> {
        self.users
            .lock()
            .map_err(|e| StoreError::Persistence(anyhow::anyhow!("User mutex poisoned: {}", e)))?
            .push(user);
        Ok(())
    }

    /// Add an identity without the duplicate check signup performs.
    pub fn add_identity(&self, identity: PasswordIdentity) -> Result<(), StoreError> {
        self.identities
            .lock()
            .map_err(|e| {
                StoreError::Persistence(anyhow::anyhow!("Identity mutex poisoned: {}", e))
            })?
            .push(identity);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let user = self
            .users
            .lock()
            .map_err(|e| StoreError::Persistence(anyhow::anyhow!("User mutex poisoned: {}", e)))?
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned();
        Ok(user)
    }

    async fn find_password_identities(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Vec<PasswordIdentity>, StoreError> {
        let identities = self
            .identities
            .lock()
            .map_err(|e| {
                StoreError::Persistence(anyhow::anyhow!("Identity mutex poisoned: {}", e))
            })?
            .iter()
            .filter(|i| i.matches(username, domain))
            .cloned()
            .collect();
        Ok(identities)
    }

    async fn create_user(
        &self,
        user: &User,
        identity: &PasswordIdentity,
    ) -> Result<(), StoreError> {
        let mut identities = self.identities.lock().map_err(|e| {
            StoreError::Persistence(anyhow::anyhow!("Identity mutex poisoned: {}", e))
        })?;

        if identities
            .iter()
            .any(|i| i.matches(&identity.username, &identity.domain))
        {
            return Err(StoreError::AlreadyExists(format!(
                "Username {} is already registered",
                identity.username
            )));
        }

        self.add_user(user.clone())?;
        identities.push(identity.clone());
        Ok(())
    }
}
