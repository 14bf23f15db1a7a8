pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod redirect;
pub mod routes;
pub mod services;
pub mod session;
pub mod utils;

use service_core::axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::config::IdentityConfig;
use crate::redirect::RedirectRuleEngine;
use crate::routes::RouteCatalog;
use crate::services::{
    IdentityResolver, PasswordAuthenticator, TokenCodec, TokenStore, UserDirectory,
};
use crate::utils::PasswordHasher;

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub tokens: Arc<dyn TokenStore>,
    pub users: Arc<dyn UserDirectory>,
    pub codec: Arc<TokenCodec>,
    pub resolver: IdentityResolver,
    pub authenticator: PasswordAuthenticator,
    pub redirects: Arc<RedirectRuleEngine>,
    pub routes: Arc<RouteCatalog>,
}

impl AppState {
    /// Wire the identity core around the given stores.
    pub fn new(
        config: IdentityConfig,
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        redirects: RedirectRuleEngine,
        routes: RouteCatalog,
    ) -> Result<Self, AppError> {
        let codec = Arc::new(TokenCodec::new(&config));
        let resolver = IdentityResolver::new(
            tokens.clone(),
            users.clone(),
            codec.clone(),
            chrono::Duration::seconds(config.token.expiry_margin_seconds),
            chrono::Duration::days(config.token.renewal_grace_days),
            config.identity.bypass_segments.clone(),
        );
        let authenticator = PasswordAuthenticator::new(
            users.clone(),
            config.identity.canonical_domain.clone(),
            PasswordHasher::new(&config.password)?,
        );

        Ok(Self {
            config,
            tokens,
            users,
            codec,
            resolver,
            authenticator,
            redirects: Arc::new(redirects),
            routes: Arc::new(routes),
        })
    }
}

/// Routes served by the identity service, before middleware is applied.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(handlers::auth::signup))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/users/me", get(handlers::user::get_me))
        .route("/dashboard", get(handlers::dashboard::dashboard))
        .route("/dashboard/error", get(handlers::dashboard::dashboard_error))
}

pub fn build_router(state: AppState) -> Router {
    build_router_with(api_routes(), state)
}

/// Apply the request lifecycle, session and tracing layers to `routes`.
pub fn build_router_with(routes: Router<AppState>, state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.config.is_prod())
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(
            state.config.session.inactivity_hours,
        )));

    routes
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::request_lifecycle_middleware,
        ))
        .with_state(state)
        .layer(session_layer)
        // Add tracing layer
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
}

/// Service health check
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.tokens.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Token store health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "token_store": "up"
        }
    })))
}
