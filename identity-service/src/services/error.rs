use service_core::error::AppError;
use thiserror::Error;

/// Failures of the signed token representation.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Bad signature, malformed payload or wrong algorithm.
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Failed to encode token: {0}")]
    Encoding(anyhow::Error),
}

/// Failures of the backing relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("Persistence error: {0}")]
    Persistence(anyhow::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let unavailable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        );

        if unavailable {
            StoreError::Unavailable(anyhow::Error::new(err))
        } else {
            StoreError::Persistence(anyhow::Error::new(err))
        }
    }
}

/// Credentials were presented but could not be turned into an identity.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Token is no longer stored as issued")]
    NotStored,

    #[error("Token was revoked")]
    Revoked,

    #[error("Token was superseded by a newer token")]
    Superseded,

    #[error("Token subject does not resolve to a user")]
    UnknownSubject,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IdentityError {
    /// True when the failure is about the caller's credential rather than the server.
    pub fn is_credential_failure(&self) -> bool {
        !matches!(self, IdentityError::Store(_) | IdentityError::Token(TokenError::Encoding(_)))
    }
}

/// Password authentication failures.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("Invalid credentials")]
    BadCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Multiple identities match the same credentials")]
    AmbiguousCredential,

    #[error("Server unavailable")]
    ServerUnavailable,

    #[error("Persistence error: {0}")]
    Persistence(anyhow::Error),
}

impl From<StoreError> for AuthenticationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => AuthenticationError::ServerUnavailable,
            StoreError::Persistence(e) => AuthenticationError::Persistence(e),
            StoreError::AlreadyExists(what) => {
                AuthenticationError::Persistence(anyhow::anyhow!("unexpected conflict: {}", what))
            }
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidSignature | TokenError::Expired => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
            TokenError::Encoding(e) => AppError::InternalError(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => {
                tracing::error!(error = %e, "Store unavailable");
                AppError::ServiceUnavailable
            }
            StoreError::Persistence(e) => AppError::DatabaseError(e),
            StoreError::AlreadyExists(what) => AppError::Conflict(anyhow::anyhow!(what)),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Token(e) => e.into(),
            IdentityError::Store(e) => e.into(),
            IdentityError::NotStored
            | IdentityError::Revoked
            | IdentityError::Superseded
            | IdentityError::UnknownSubject => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
        }
    }
}

impl From<AuthenticationError> for AppError {
    fn from(err: AuthenticationError) -> Self {
        match err {
            AuthenticationError::BadCredentials
            | AuthenticationError::UserNotFound
            | AuthenticationError::AmbiguousCredential => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            AuthenticationError::ServerUnavailable => AppError::ServiceUnavailable,
            AuthenticationError::Persistence(e) => AppError::DatabaseError(e),
        }
    }
}
