use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use service_core::error::AppError;
use tower_sessions::Session;

use crate::{
    dtos::auth::{LoginRequest, SignupRequest, TokenResponse},
    models::{AccessToken, TerminationSource, TokenSource, User, UserResponse},
    services::{Credentials, Evidence, RequestAuthCache},
    session::{self, SessionState},
    utils::{Password, ValidatedJson},
    AppState,
};

fn host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|h| h.to_str().ok())
}

/// Bind a freshly issued token to the request and session, and hand it out.
async fn issue(
    state: &AppState,
    cache: &RequestAuthCache,
    session: Option<&Session>,
    headers: &HeaderMap,
    jar: CookieJar,
    user: User,
    token: AccessToken,
) -> Result<(CookieJar, Json<TokenResponse>), AppError> {
    let cookie = state.codec.to_cookie(&token, host(headers), Utc::now())?;
    let signed = cookie.value().to_string();

    if let Some(session) = session {
        if let Err(e) = session::set_identity(session, &token).await {
            tracing::warn!(error = %e, "Failed to bind token to session");
        }
    }

    let response = TokenResponse {
        user: UserResponse::from(&user),
        token: signed,
        token_type: "Bearer".to_string(),
        expires_at: token.expiry_utc,
    };
    cache.install(user, token);

    Ok((jar.add(cookie), Json(response)))
}

/// Create an account and sign it in.
pub async fn signup(
    State(state): State<AppState>,
    cache: RequestAuthCache,
    session: Option<Session>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .authenticator
        .register(
            &req.username,
            req.domain.as_deref(),
            &Password::new(req.password),
            req.display_name,
        )
        .await?;

    let token = state.tokens.create(user.user_id, TokenSource::Signup).await?;
    let (jar, body) = issue(&state, &cache, session.as_ref(), &headers, jar, user, token).await?;

    Ok((StatusCode::CREATED, jar, body))
}

/// Login with username, domain and password
pub async fn login(
    State(state): State<AppState>,
    cache: RequestAuthCache,
    session: Option<Session>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let credentials = Credentials {
        username: req.username,
        domain: req.domain,
        password: Password::new(req.password),
    };

    let user = state.authenticator.authenticate(&credentials, &cache).await?;
    let token = state.tokens.create(user.user_id, TokenSource::Login).await?;

    issue(&state, &cache, session.as_ref(), &headers, jar, user, token).await
}

/// Logout: expire the current token and clear it from session and cookie.
///
/// `logout` is a bypassed path segment, so identity is resolved here rather
/// than by the lifecycle middleware.
pub async fn logout(
    State(state): State<AppState>,
    cache: RequestAuthCache,
    session: Option<Session>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let credential = state.codec.credential_from_request(&headers);
    let evidence = Evidence {
        cache: &cache,
        session: session.as_ref().map(|s| s as &dyn SessionState),
        credential: credential.as_deref(),
    };

    let identity = state
        .resolver
        .resolve(&evidence)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))?;

    state
        .tokens
        .expire(&identity.access_token, TerminationSource::Logout, Utc::now())
        .await?;

    if let Some(session) = session.as_ref() {
        if let Err(e) = session::clear_identity(session).await {
            tracing::warn!(error = %e, "Failed to clear session identity");
        }
    }
    cache.clear();

    tracing::info!(user_id = %identity.user.user_id, "User logged out");

    Ok((
        jar.add(state.codec.expired_cookie(host(&headers))),
        Json(serde_json::json!({
            "message": "Logged out successfully"
        })),
    ))
}

/// Exchange the current (possibly expired) token for a new one.
pub async fn refresh(
    State(state): State<AppState>,
    cache: RequestAuthCache,
    session: Option<Session>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let credential = state
        .codec
        .credential_from_request(&headers)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing bearer credential")))?;

    let (user, previous) = state.resolver.resolve_for_renewal(&credential).await?;

    // Marks the exchanged token even when it already expired, so it can
    // never be renewed a second time.
    state
        .tokens
        .expire(&previous, TerminationSource::Timeout, Utc::now())
        .await?;

    let token = state
        .tokens
        .create(user.user_id, TokenSource::TokenRefresh)
        .await?;

    tracing::info!(
        user_id = %user.user_id,
        previous = %previous.token_id,
        token_id = %token.token_id,
        "Token refreshed"
    );

    issue(&state, &cache, session.as_ref(), &headers, jar, user, token).await
}
