//! User model - the account a resolved identity points at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User entity.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub domain: String,
    pub display_name: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user.
    pub fn new(username: String, domain: String, display_name: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            username,
            domain,
            display_name,
            created_utc: Utc::now(),
        }
    }
}

/// User response for API.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub username: String,
    pub domain: String,
    pub display_name: Option<String>,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            username: u.username.clone(),
            domain: u.domain.clone(),
            display_name: u.display_name.clone(),
        }
    }
}
