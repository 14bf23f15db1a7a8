//! Route metadata consulted by the request lifecycle middleware.

use axum::http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRequirement {
    /// Reject with 401 before the handler runs when no valid identity resolves.
    Required,
    /// Run the handler either way.
    Optional,
}

#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub method: Method,
    /// Canonical path as registered with the router, e.g. `/users/:id`.
    pub path: String,
    pub group: Option<String>,
    pub identity: IdentityRequirement,
}

#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    routes: Vec<RouteInfo>,
}

impl RouteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        method: Method,
        path: &str,
        group: Option<&str>,
        identity: IdentityRequirement,
    ) -> Self {
        self.routes.push(RouteInfo {
            method,
            path: path.to_string(),
            group: group.map(String::from),
            identity,
        });
        self
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&RouteInfo> {
        self.routes
            .iter()
            .find(|r| r.path == path && (r.method == *method || (*method == Method::HEAD && r.method == Method::GET)))
    }

    /// Metadata for every route the service registers.
    pub fn standard() -> Self {
        use IdentityRequirement::{Optional, Required};

        Self::new()
            .route(Method::GET, "/health", None, Optional)
            .route(Method::POST, "/auth/signup", Some("auth"), Optional)
            .route(Method::POST, "/auth/login", Some("auth"), Optional)
            .route(Method::POST, "/auth/logout", Some("auth"), Required)
            .route(Method::POST, "/auth/refresh", Some("auth"), Optional)
            .route(Method::GET, "/users/me", Some("account"), Required)
            .route(Method::GET, "/dashboard", Some("dashboard"), Optional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_method_and_path() {
        let catalog = RouteCatalog::standard();

        let me = catalog.lookup(&Method::GET, "/users/me").unwrap();
        assert_eq!(me.identity, IdentityRequirement::Required);
        assert_eq!(me.group.as_deref(), Some("account"));

        assert!(catalog.lookup(&Method::POST, "/users/me").is_none());
        assert!(catalog.lookup(&Method::GET, "/nope").is_none());
    }

    #[test]
    fn test_head_uses_get_metadata() {
        let catalog = RouteCatalog::standard();
        let dashboard = catalog.lookup(&Method::HEAD, "/dashboard").unwrap();
        assert_eq!(dashboard.group.as_deref(), Some("dashboard"));
    }
}
