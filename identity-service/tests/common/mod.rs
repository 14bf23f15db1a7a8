//! Shared setup for identity-service integration tests.
//!
//! Everything runs in-process against the in-memory stores, so no database
//! is needed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router_with,
    config::{
        DatabaseConfig, Environment, IdentityConfig, IdentitySettings, PasswordHashConfig,
        RedirectConfig, SessionConfig, TokenConfig,
    },
    models::{PasswordIdentity, User},
    redirect::{RedirectRule, RedirectRuleConfig, RedirectRuleEngine},
    routes::RouteCatalog,
    services::{MemoryTokenStore, MemoryUserDirectory},
    utils::{Password, PasswordHasher},
    AppState,
};
use secrecy::Secret;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_USERNAME: &str = "alice";
pub const TEST_PASSWORD: &str = "correct-horse-battery";
pub const TEST_DOMAIN: &str = "local";
pub const COOKIE_NAME: &str = "X-Acme-BTOK-Cookie";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config { port: 0 },
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        app_name: "Acme".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 0,
        },
        token: TokenConfig {
            signing_secret: Secret::new("integration-test-signing-secret-0123456789".to_string()),
            grant_days: 90,
            expiry_margin_seconds: 5,
            renewal_grace_days: 7,
            cookie_domain: "localhost".to_string(),
        },
        identity: IdentitySettings {
            canonical_domain: TEST_DOMAIN.to_string(),
            bypass_segments: vec!["logout".to_string(), "health".to_string()],
        },
        // Cheapest parameters argon2 accepts; keeps tests fast.
        password: PasswordHashConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
        redirect: RedirectConfig {
            rules_path: None,
            history_limit: 10,
        },
        session: SessionConfig {
            inactivity_hours: 1,
        },
    }
}

/// The default dashboard rule: any non-2xx dashboard response goes to the
/// error page, carrying the failed request's id.
pub fn dashboard_rules() -> RedirectRuleEngine {
    let rule = RedirectRule::new(RedirectRuleConfig {
        group: Some("dashboard".to_string()),
        path: None,
        method: None,
        status: vec!["non-2xx".parse().unwrap()],
        target: "/dashboard/error".to_string(),
        kind: Default::default(),
        directives: vec![identity_service::redirect::RedirectDirective::PreviousRequestId],
    })
    .unwrap();

    RedirectRuleEngine::new(vec![rule])
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tokens: Arc<MemoryTokenStore>,
    pub users: Arc<MemoryUserDirectory>,
    pub user: User,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(
            identity_service::api_routes(),
            RouteCatalog::standard(),
            dashboard_rules(),
        )
    }

    /// Build the app around custom routes and route metadata.
    pub fn spawn_with(
        routes: Router<AppState>,
        catalog: RouteCatalog,
        redirects: RedirectRuleEngine,
    ) -> Self {
        let config = test_config();
        let tokens = Arc::new(MemoryTokenStore::new(chrono::Duration::days(
            config.token.grant_days,
        )));
        let users = Arc::new(MemoryUserDirectory::new());

        let hasher = PasswordHasher::new(&config.password).unwrap();
        let user = User::new(
            TEST_USERNAME.to_string(),
            TEST_DOMAIN.to_string(),
            Some("Alice".to_string()),
        );
        let hash = hasher
            .hash(&Password::new(TEST_PASSWORD.to_string()))
            .unwrap();
        users.add_user(user.clone()).unwrap();
        users
            .add_identity(PasswordIdentity::new(
                user.user_id,
                TEST_USERNAME.to_string(),
                TEST_DOMAIN.to_string(),
                hash.into_string(),
            ))
            .unwrap();

        let state = AppState::new(config, tokens.clone(), users.clone(), redirects, catalog)
            .unwrap();
        let router = build_router_with(routes, state.clone());

        Self {
            router,
            state,
            tokens,
            users,
            user,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response<Body> {
        self.send(request(Method::GET, path, cookie, None)).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        cookie: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        self.send(request(Method::POST, path, cookie, Some(body))).await
    }

    /// Log the seeded user in and return the `name=value` bearer cookie.
    pub async fn login(&self) -> String {
        let response = self
            .post_json(
                "/auth/login",
                None,
                serde_json::json!({
                    "username": TEST_USERNAME,
                    "password": TEST_PASSWORD
                }),
            )
            .await;
        assert_eq!(response.status(), 200);

        bearer_cookie(&response).expect("login should set the bearer cookie")
    }
}

pub fn request(
    method: Method,
    path: &str,
    cookie: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// `name=value` of the bearer cookie set by `response`, if any.
pub fn bearer_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", COOKIE_NAME)))
        .and_then(|v| v.split(';').next())
        .map(String::from)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
