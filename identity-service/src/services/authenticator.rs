use std::sync::Arc;

use service_core::error::AppError;

use crate::models::{PasswordIdentity, User};
use crate::services::error::AuthenticationError;
use crate::services::identity_resolver::RequestAuthCache;
use crate::services::users::UserDirectory;
use crate::utils::{verify_password, Password, PasswordHashString, PasswordHasher};

/// A username/domain/password triple as submitted by the caller.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub domain: Option<String>,
    pub password: Password,
}

/// Checks password credentials against stored identity records.
#[derive(Clone)]
pub struct PasswordAuthenticator {
    users: Arc<dyn UserDirectory>,
    canonical_domain: String,
    hasher: PasswordHasher,
}

impl PasswordAuthenticator {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        canonical_domain: String,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            users,
            canonical_domain,
            hasher,
        }
    }

    fn domain_or_canonical<'a>(&'a self, domain: Option<&'a str>) -> &'a str {
        match domain.map(str::trim) {
            Some(d) if !d.is_empty() => d,
            _ => &self.canonical_domain,
        }
    }

    /// Authenticate and record the user in the request cache. No token is issued.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        cache: &RequestAuthCache,
    ) -> Result<User, AuthenticationError> {
        let domain = self.domain_or_canonical(credentials.domain.as_deref());
        let username = credentials.username.trim();

        let mut identities = self
            .users
            .find_password_identities(username, domain)
            .await?;

        let identity = match identities.len() {
            0 => {
                tracing::info!(username, domain, "Login for unknown user");
                return Err(AuthenticationError::UserNotFound);
            }
            1 => identities.remove(0),
            count => {
                tracing::error!(
                    username,
                    domain,
                    count,
                    "Multiple password identities share one login"
                );
                return Err(AuthenticationError::AmbiguousCredential);
            }
        };

        if !self.verify(&credentials.password, &identity).await? {
            tracing::info!(user_id = %identity.user_id, "Password mismatch");
            return Err(AuthenticationError::BadCredentials);
        }

        let user = self
            .users
            .find_user_by_id(identity.user_id)
            .await?
            .ok_or_else(|| {
                AuthenticationError::Persistence(anyhow::anyhow!(
                    "Identity {} points at missing user {}",
                    identity.ident_id,
                    identity.user_id
                ))
            })?;

        cache.set_user(user.clone());
        tracing::info!(user_id = %user.user_id, "User authenticated");

        Ok(user)
    }

    async fn verify(
        &self,
        password: &Password,
        identity: &PasswordIdentity,
    ) -> Result<bool, AuthenticationError> {
        let password = password.clone();
        let hash = PasswordHashString::new(identity.password_hash.clone());

        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthenticationError::Persistence(anyhow::anyhow!("Verification task failed: {}", e)))?
            .map_err(AuthenticationError::Persistence)
    }

    /// Create a user with a password identity.
    pub async fn register(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &Password,
        display_name: Option<String>,
    ) -> Result<User, AppError> {
        let domain = self.domain_or_canonical(domain).to_string();
        let username = username.trim().to_string();

        let hasher = self.hasher.clone();
        let password = password.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| anyhow::anyhow!("Hashing task failed: {}", e))??;

        let user = User::new(username.clone(), domain.clone(), display_name);
        let identity = PasswordIdentity::new(user.user_id, username, domain, hash.into_string());

        self.users.create_user(&user, &identity).await?;

        Ok(user)
    }
}
