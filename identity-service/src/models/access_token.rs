//! Access token model - bearer credentials issued on signup, login and refresh.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why a token was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenSource {
    Signup,
    Login,
    TokenRefresh,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Signup => "signup",
            TokenSource::Login => "login",
            TokenSource::TokenRefresh => "token-refresh",
        }
    }
}

impl std::str::FromStr for TokenSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "signup" => Ok(TokenSource::Signup),
            "login" => Ok(TokenSource::Login),
            "token-refresh" => Ok(TokenSource::TokenRefresh),
            _ => Err(format!("Invalid token source: {}", s)),
        }
    }
}

/// Why a token was expired ahead of its natural expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationSource {
    Timeout,
    Logout,
    KickedOut,
}

impl TerminationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationSource::Timeout => "timeout",
            TerminationSource::Logout => "logout",
            TerminationSource::KickedOut => "kicked-out",
        }
    }
}

impl std::str::FromStr for TerminationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timeout" => Ok(TerminationSource::Timeout),
            "logout" => Ok(TerminationSource::Logout),
            "kicked-out" => Ok(TerminationSource::KickedOut),
            _ => Err(format!("Invalid termination source: {}", s)),
        }
    }
}

/// One issued credential. Never deleted; expiry only ever moves earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    /// Random secret material embedded in the signed representation.
    pub token_value: String,
    pub source: TokenSource,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub terminated_by: Option<TerminationSource>,
    pub terminated_utc: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Issue a new token valid for `grant` from now.
    ///
    /// Timestamps are truncated to whole seconds so the signed form
    /// (unix seconds) decodes back to an identical record.
    pub fn issue(user_id: Uuid, source: TokenSource, grant: Duration) -> Self {
        let now = truncate_to_seconds(Utc::now());
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_value: generate_token_value(),
            source,
            created_utc: now,
            expiry_utc: now + grant,
            terminated_by: None,
            terminated_utc: None,
        }
    }

    /// Check if the token is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    /// Check if the token is still usable at `now`, keeping `margin` in reserve
    /// so that a token about to expire is not accepted mid-request.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expiry_utc
    }

    /// Seconds of validity left, never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expiry_utc - now).num_seconds().max(0)
    }

    /// Check if the token was ended by the user or an operator (not by time).
    pub fn is_revoked(&self) -> bool {
        matches!(
            self.terminated_by,
            Some(TerminationSource::Logout) | Some(TerminationSource::KickedOut)
        )
    }

    /// Expire the token at `at`. The expiry never moves later.
    pub fn expire(&mut self, source: TerminationSource, at: DateTime<Utc>) {
        let at = truncate_to_seconds(at);
        if at < self.expiry_utc {
            self.expiry_utc = at;
        }
        self.terminated_by = Some(source);
        self.terminated_utc = Some(at);
    }
}

/// Database row for `access_tokens`; enum columns are stored as text codes.
#[derive(Debug, Clone, FromRow)]
pub struct AccessTokenRow {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_value: String,
    pub source_code: String,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub termination_code: Option<String>,
    pub terminated_utc: Option<DateTime<Utc>>,
}

impl TryFrom<AccessTokenRow> for AccessToken {
    type Error = String;

    fn try_from(row: AccessTokenRow) -> Result<Self, Self::Error> {
        let terminated_by = row
            .termination_code
            .as_deref()
            .map(str::parse::<TerminationSource>)
            .transpose()?;

        Ok(Self {
            token_id: row.token_id,
            user_id: row.user_id,
            token_value: row.token_value,
            source: row.source_code.parse()?,
            created_utc: row.created_utc,
            expiry_utc: row.expiry_utc,
            terminated_by,
            terminated_utc: row.terminated_utc,
        })
    }
}

pub(crate) fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

fn generate_token_value() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_sets_expiry_after_creation() {
        let token = AccessToken::issue(Uuid::new_v4(), TokenSource::Login, Duration::days(90));

        assert!(token.expiry_utc >= token.created_utc);
        assert_eq!(token.created_utc.timestamp_subsec_nanos(), 0);
        assert_eq!(token.token_value.len(), 64);
        assert!(token.terminated_by.is_none());
        assert!(token.is_valid_at(Utc::now(), Duration::seconds(5)));
    }

    #[test]
    fn test_issued_values_are_unique() {
        let user_id = Uuid::new_v4();
        let a = AccessToken::issue(user_id, TokenSource::Login, Duration::days(1));
        let b = AccessToken::issue(user_id, TokenSource::Login, Duration::days(1));

        assert_ne!(a.token_value, b.token_value);
        assert_ne!(a.token_id, b.token_id);
    }

    #[test]
    fn test_margin_rejects_token_about_to_expire() {
        let mut token = AccessToken::issue(Uuid::new_v4(), TokenSource::Login, Duration::days(1));
        let now = Utc::now();
        token.expiry_utc = now + Duration::seconds(2);

        assert!(!token.is_expired_at(now));
        assert!(!token.is_valid_at(now, Duration::seconds(5)));
    }

    #[test]
    fn test_expire_never_moves_later() {
        let mut token = AccessToken::issue(Uuid::new_v4(), TokenSource::Login, Duration::days(1));
        let now = Utc::now();

        token.expire(TerminationSource::Timeout, now - Duration::minutes(1));
        let first = token.expiry_utc;

        token.expire(TerminationSource::Logout, now - Duration::minutes(10));
        assert!(token.expiry_utc < first);
        assert_eq!(token.terminated_by, Some(TerminationSource::Logout));

        let earliest = token.expiry_utc;
        token.expire(TerminationSource::KickedOut, now + Duration::days(30));
        assert_eq!(token.expiry_utc, earliest);
        assert!(token.is_revoked());
    }

    #[test]
    fn test_remaining_seconds_is_zero_when_expired() {
        let mut token = AccessToken::issue(Uuid::new_v4(), TokenSource::Login, Duration::days(1));
        token.expire(TerminationSource::Timeout, Utc::now() - Duration::hours(1));

        assert_eq!(token.remaining_seconds(Utc::now()), 0);
    }

    #[test]
    fn test_row_conversion() {
        let row = AccessTokenRow {
            token_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_value: "abc".to_string(),
            source_code: "token-refresh".to_string(),
            created_utc: Utc::now(),
            expiry_utc: Utc::now(),
            termination_code: Some("kicked-out".to_string()),
            terminated_utc: Some(Utc::now()),
        };

        let token = AccessToken::try_from(row).unwrap();
        assert_eq!(token.source, TokenSource::TokenRefresh);
        assert_eq!(token.terminated_by, Some(TerminationSource::KickedOut));
    }

    #[test]
    fn test_row_conversion_rejects_unknown_code() {
        let row = AccessTokenRow {
            token_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_value: "abc".to_string(),
            source_code: "magic".to_string(),
            created_utc: Utc::now(),
            expiry_utc: Utc::now(),
            termination_code: None,
            terminated_utc: None,
        };

        assert!(AccessToken::try_from(row).is_err());
    }
}
