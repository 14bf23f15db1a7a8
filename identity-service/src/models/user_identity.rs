//! Password identity model - the salted-hash record a username/domain pair logs in with.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Password identity entity.
/// `password_hash` is an argon2 PHC string.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordIdentity {
    pub ident_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub domain: String,
    pub password_hash: String,
    pub created_utc: DateTime<Utc>,
}

impl PasswordIdentity {
    /// Create a new password identity for a user.
    pub fn new(user_id: Uuid, username: String, domain: String, password_hash: String) -> Self {
        Self {
            ident_id: Uuid::new_v4(),
            user_id,
            username,
            domain,
            password_hash,
            created_utc: Utc::now(),
        }
    }

    /// Case-insensitive match on username and domain.
    pub fn matches(&self, username: &str, domain: &str) -> bool {
        self.username.eq_ignore_ascii_case(username) && self.domain.eq_ignore_ascii_case(domain)
    }
}
