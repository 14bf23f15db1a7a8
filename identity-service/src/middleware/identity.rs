use axum::{extract::FromRequestParts, http::request::Parts};
use service_core::error::AppError;
use std::convert::Infallible;

use crate::services::{RequestAuthCache, ResolvedIdentity};

/// Identity resolved by the lifecycle middleware; rejects with 401 when absent.
pub struct CurrentIdentity(pub ResolvedIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}

/// Identity if one was resolved.
pub struct MaybeIdentity(pub Option<ResolvedIdentity>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(parts.extensions.get::<ResolvedIdentity>().cloned()))
    }
}

/// The request's identity cache. Routes outside the lifecycle middleware get a
/// fresh, unshared cache.
#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestAuthCache
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestAuthCache>()
            .cloned()
            .unwrap_or_default())
    }
}
