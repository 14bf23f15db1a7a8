//! Works out who is calling from the evidence attached to a request.
//!
//! Three sources can name the caller and any of them may be stale: the
//! request-scoped cache, the server-side session and the signed bearer
//! credential. They are consulted in that order and the first valid one wins.
//! A winning source refreshes the weaker ones so later lookups in the same
//! request (and the next request in the same session) are cheap.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{AccessToken, User};
use crate::services::error::{IdentityError, TokenError};
use crate::services::token_codec::TokenCodec;
use crate::services::token_store::TokenStore;
use crate::services::users::UserDirectory;
use crate::session::{self, SessionState};

/// Which source produced the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    CacheHit,
    SessionStoreHit,
    CookieVerified,
}

/// The caller of one request.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user: User,
    pub access_token: AccessToken,
    pub provenance: Provenance,
}

#[derive(Debug, Default)]
struct CachedIdentity {
    user: Option<User>,
    token: Option<AccessToken>,
}

/// Per-request identity cache shared between the middleware and handlers.
#[derive(Debug, Clone, Default)]
pub struct RequestAuthCache(Arc<Mutex<CachedIdentity>>);

impl RequestAuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another holder panicked mid-write of plain data.
    fn lock(&self) -> MutexGuard<'_, CachedIdentity> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    pub fn token(&self) -> Option<AccessToken> {
        self.lock().token.clone()
    }

    /// Record the user only, e.g. after a password check and before a token exists.
    pub fn set_user(&self, user: User) {
        let mut cached = self.lock();
        if cached.token.as_ref().is_some_and(|t| t.user_id != user.user_id) {
            cached.token = None;
        }
        cached.user = Some(user);
    }

    pub fn install(&self, user: User, token: AccessToken) {
        let mut cached = self.lock();
        cached.user = Some(user);
        cached.token = Some(token);
    }

    pub fn clear(&self) {
        *self.lock() = CachedIdentity::default();
    }
}

/// Everything a request offers as proof of identity.
pub struct Evidence<'a> {
    pub cache: &'a RequestAuthCache,
    pub session: Option<&'a dyn SessionState>,
    /// Signed credential from the bearer header or cookie.
    pub credential: Option<&'a str>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserDirectory>,
    codec: Arc<TokenCodec>,
    margin: Duration,
    renewal_grace: Duration,
    bypass_segments: Arc<Vec<String>>,
}

impl IdentityResolver {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        codec: Arc<TokenCodec>,
        margin: Duration,
        renewal_grace: Duration,
        bypass_segments: Vec<String>,
    ) -> Self {
        Self {
            tokens,
            users,
            codec,
            margin,
            renewal_grace,
            bypass_segments: Arc::new(bypass_segments),
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Paths with an allow-listed segment skip resolution entirely.
    pub fn is_bypassed(&self, path: &str) -> bool {
        path.split('/').any(|segment| {
            self.bypass_segments
                .iter()
                .any(|bypass| bypass.eq_ignore_ascii_case(segment))
        })
    }

    /// `Ok(None)` means no usable evidence was offered. `Err` means a
    /// credential was presented and turned out to be invalid.
    pub async fn resolve(
        &self,
        evidence: &Evidence<'_>,
    ) -> Result<Option<ResolvedIdentity>, IdentityError> {
        if let Some(identity) = self.from_cache(evidence).await {
            return Ok(Some(identity));
        }

        if let Some(identity) = self.from_session(evidence).await? {
            return Ok(Some(identity));
        }

        match evidence.credential {
            Some(credential) => self.from_credential(evidence, credential).await.map(Some),
            None => Ok(None),
        }
    }

    async fn from_cache(&self, evidence: &Evidence<'_>) -> Option<ResolvedIdentity> {
        let user = evidence.cache.user()?;
        let token = evidence.cache.token()?;

        if token.user_id != user.user_id || !token.is_valid_at(Utc::now(), self.margin) {
            return None;
        }

        if let Some(session) = evidence.session {
            match read_session_identity(session).await {
                None => {
                    if let Err(e) = session::set_identity(session, &token).await {
                        tracing::warn!(error = %e, "Failed to promote identity into session");
                    }
                }
                Some(entry) if entry.user_id == user.user_id => {}
                Some(_) => return None,
            }
        }

        Some(ResolvedIdentity {
            user,
            access_token: token,
            provenance: Provenance::CacheHit,
        })
    }

    async fn from_session(
        &self,
        evidence: &Evidence<'_>,
    ) -> Result<Option<ResolvedIdentity>, IdentityError> {
        let Some(session) = evidence.session else {
            return Ok(None);
        };
        let Some(entry) = read_session_identity(session).await else {
            return Ok(None);
        };

        match self.validate_stored(&entry).await? {
            Some((user, token)) => {
                evidence.cache.install(user.clone(), token.clone());
                tracing::debug!(user_id = %user.user_id, "Identity restored from session");
                Ok(Some(ResolvedIdentity {
                    user,
                    access_token: token,
                    provenance: Provenance::SessionStoreHit,
                }))
            }
            None => {
                tracing::info!(token_id = %entry.token_id, "Removing stale session identity");
                if let Err(e) = session::clear_identity(session).await {
                    tracing::warn!(error = %e, "Failed to remove stale session identity");
                }
                Ok(None)
            }
        }
    }

    /// Re-check a session entry against the store. `None` when it is stale.
    async fn validate_stored(
        &self,
        entry: &AccessToken,
    ) -> Result<Option<(User, AccessToken)>, IdentityError> {
        let now = Utc::now();
        if !entry.is_valid_at(now, self.margin) {
            return Ok(None);
        }

        let Some(stored) = self.tokens.find_by_value(&entry.token_value).await? else {
            return Ok(None);
        };
        if stored.token_id != entry.token_id || !stored.is_valid_at(now, self.margin) {
            return Ok(None);
        }

        let user = self.users.find_user_by_id(stored.user_id).await?;
        Ok(user.map(|user| (user, stored)))
    }

    async fn from_credential(
        &self,
        evidence: &Evidence<'_>,
        credential: &str,
    ) -> Result<ResolvedIdentity, IdentityError> {
        let presented = self.codec.verify(credential)?;
        let now = Utc::now();

        if !presented.is_valid_at(now, self.margin) {
            return Err(TokenError::Expired.into());
        }

        let stored = self.find_stored(&presented).await?;
        if !stored.is_valid_at(now, self.margin) {
            return Err(if stored.is_revoked() {
                IdentityError::Revoked
            } else {
                TokenError::Expired.into()
            });
        }

        let user = self.find_subject(stored.user_id).await?;

        evidence.cache.install(user.clone(), stored.clone());
        if let Some(session) = evidence.session {
            if let Err(e) = session::set_identity(session, &stored).await {
                tracing::warn!(error = %e, "Failed to store identity in session");
            }
        }

        tracing::debug!(user_id = %user.user_id, "Identity verified from bearer credential");

        Ok(ResolvedIdentity {
            user,
            access_token: stored,
            provenance: Provenance::CookieVerified,
        })
    }

    /// Resolve a credential for renewal. Expiry is ignored, but the token must
    /// still be on record, must not have been revoked and must be the newest
    /// live token of its subject.
    pub async fn resolve_for_renewal(
        &self,
        credential: &str,
    ) -> Result<(User, AccessToken), IdentityError> {
        let presented = self.codec.verify(credential)?;
        let stored = self.find_stored(&presented).await?;

        if stored.is_revoked() {
            return Err(IdentityError::Revoked);
        }

        // Any other termination means an earlier refresh already exchanged it.
        if stored.terminated_by.is_some() {
            return Err(IdentityError::Superseded);
        }

        if Utc::now() > stored.expiry_utc + self.renewal_grace {
            return Err(TokenError::Expired.into());
        }

        if let Some(newest) = self.tokens.find_by_subject(stored.user_id).await? {
            if newest.token_id != stored.token_id {
                return Err(IdentityError::Superseded);
            }
        }

        let user = self.find_subject(stored.user_id).await?;
        Ok((user, stored))
    }

    async fn find_stored(&self, presented: &AccessToken) -> Result<AccessToken, IdentityError> {
        let stored = self
            .tokens
            .find_by_value(&presented.token_value)
            .await?
            .ok_or(IdentityError::NotStored)?;

        if stored.token_id != presented.token_id || stored.user_id != presented.user_id {
            return Err(IdentityError::NotStored);
        }

        Ok(stored)
    }

    async fn find_subject(&self, user_id: Uuid) -> Result<User, IdentityError> {
        self.users
            .find_user_by_id(user_id)
            .await?
            .ok_or(IdentityError::UnknownSubject)
    }
}

async fn read_session_identity(session: &dyn SessionState) -> Option<AccessToken> {
    match session::identity(session).await {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(error = %e, "Session read failed, treating as empty");
            None
        }
    }
}
