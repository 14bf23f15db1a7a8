use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::models::{AccessToken, TokenSource};
use crate::services::error::TokenError;

/// Cookie value written on logout in place of a real token.
pub const EXPIRED_COOKIE_VALUE: &str = "-expired-";

/// Browsers silently drop cookies larger than this.
const MAX_COOKIE_BYTES: usize = 4096;

/// Claims carried by the signed bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Token ID (matches database record)
    pub jti: String,
    /// Opaque random value of the stored token
    pub val: String,
    /// Issuing source
    pub src: TokenSource,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Signs and verifies bearer tokens and moves them in and out of cookies.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    cookie_name: String,
    fallback_domain: String,
    secure: bool,
}

impl TokenCodec {
    pub fn new(config: &IdentityConfig) -> Self {
        Self::from_secret(
            &config.token.signing_secret,
            config.cookie_name(),
            config.token.cookie_domain.clone(),
            config.is_prod(),
        )
    }

    pub fn from_secret(
        secret: &Secret<String>,
        cookie_name: String,
        fallback_domain: String,
        secure: bool,
    ) -> Self {
        let key = secret.expose_secret().as_bytes();

        // Expiry is checked by callers so renewal can accept expired tokens.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        tracing::info!(cookie = %cookie_name, "Token codec initialized with HS256 key");

        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            validation,
            cookie_name,
            fallback_domain,
            secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sign a token into its compact transport form.
    pub fn sign(&self, token: &AccessToken) -> Result<String, TokenError> {
        let claims = BearerClaims {
            sub: token.user_id.to_string(),
            jti: token.token_id.to_string(),
            val: token.token_value.clone(),
            src: token.source,
            iat: token.created_utc.timestamp(),
            exp: token.expiry_utc.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Verify the signature and rebuild the token. Expiry is not checked.
    pub fn verify(&self, compact: &str) -> Result<AccessToken, TokenError> {
        let data = decode::<BearerClaims>(compact, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token verification failed");
                TokenError::InvalidSignature
            })?;

        let claims = data.claims;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::InvalidSignature)?;
        let token_id = Uuid::parse_str(&claims.jti).map_err(|_| TokenError::InvalidSignature)?;
        let created_utc =
            DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::InvalidSignature)?;
        let expiry_utc =
            DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::InvalidSignature)?;

        Ok(AccessToken {
            token_id,
            user_id,
            token_value: claims.val,
            source: claims.src,
            created_utc,
            expiry_utc,
            terminated_by: None,
            terminated_utc: None,
        })
    }

    /// Build the bearer cookie for `token`, scoped to the serving host.
    pub fn to_cookie(
        &self,
        token: &AccessToken,
        host: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Cookie<'static>, TokenError> {
        let value = self.sign(token)?;
        let expires = time::OffsetDateTime::from_unix_timestamp(token.expiry_utc.timestamp())
            .map_err(|e| TokenError::Encoding(anyhow::anyhow!("Invalid cookie expiry: {}", e)))?;

        let cookie = Cookie::build((self.cookie_name.clone(), value))
            .domain(self.cookie_domain(host))
            .path("/")
            .http_only(self.secure)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .expires(expires)
            .max_age(time::Duration::seconds(token.remaining_seconds(now)))
            .build();

        let size = cookie.to_string().len();
        if size > MAX_COOKIE_BYTES {
            tracing::warn!(size, "Bearer cookie exceeds {} bytes", MAX_COOKIE_BYTES);
        }

        Ok(cookie)
    }

    /// Cookie that overwrites the bearer cookie with the expired sentinel.
    pub fn expired_cookie(&self, host: Option<&str>) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), EXPIRED_COOKIE_VALUE.to_string()))
            .domain(self.cookie_domain(host))
            .path("/")
            .http_only(self.secure)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .expires(time::OffsetDateTime::UNIX_EPOCH)
            .max_age(time::Duration::ZERO)
            .build()
    }

    /// Signed credential from the bearer cookie, if a real one is present.
    pub fn credential_from_jar(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty() && value != EXPIRED_COOKIE_VALUE)
    }

    /// Signed credential presented with the request: the `Authorization: Bearer`
    /// header wins over the cookie.
    pub fn credential_from_request(&self, headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        bearer.or_else(|| self.credential_from_jar(&CookieJar::from_headers(headers)))
    }

    fn cookie_domain(&self, host: Option<&str>) -> String {
        host.map(host_without_port)
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.fallback_domain)
            .to_string()
    }
}

/// Strip an optional `:port` suffix, keeping bracketed IPv6 literals intact.
fn host_without_port(host: &str) -> &str {
    let host = host.trim();
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
