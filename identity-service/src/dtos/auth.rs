use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::UserResponse;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 256, message = "Username is required"))]
    pub username: String,

    /// Empty or absent means the canonical domain.
    pub domain: Option<String>,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 256, message = "Username is required"))]
    pub username: String,

    pub domain: Option<String>,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    pub display_name: Option<String>,
}

/// Issued credential returned by signup, login and refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub user: UserResponse,
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}
