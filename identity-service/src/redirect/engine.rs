use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use service_core::error::AppError;

use super::directive::DirectiveContext;
use super::rule::{normalize_path, RedirectRule};

pub const REDIRECTED_PARAMS_HEADER: &str = "x-redirected-params";
pub const REDIRECTED_SOURCE_HEADER: &str = "x-redirected-source";

/// Identity of the route that produced the response.
#[derive(Debug, Clone)]
pub struct RouteFacts<'a> {
    pub method: Method,
    /// Canonical (matched) path, e.g. `/users/:id`.
    pub path: &'a str,
    pub group: Option<&'a str>,
}

/// The request as the caller sent it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub directives: DirectiveContext,
}

impl RequestContext {
    /// Referring URL: path plus query.
    pub fn source_url(&self) -> String {
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone)]
pub struct RedirectMatch {
    pub rule_index: usize,
    pub status: StatusCode,
    pub location: String,
    pub headers: HeaderMap,
}

impl RedirectMatch {
    /// Replace `original` with the redirect, keeping its `Set-Cookie` headers.
    pub fn into_response(self, original: &Response) -> Response {
        let mut response = self.status.into_response();
        let headers = response.headers_mut();

        headers.extend(self.headers);
        for cookie in original.headers().get_all(header::SET_COOKIE) {
            headers.append(header::SET_COOKIE, cookie.clone());
        }

        response
    }
}

#[derive(Debug, Default, Deserialize)]
struct RedirectRulesFile {
    #[serde(default)]
    rules: Vec<RedirectRule>,
}

/// Ordered, immutable list of redirect rules.
#[derive(Debug, Clone, Default)]
pub struct RedirectRuleEngine {
    rules: Vec<RedirectRule>,
}

impl RedirectRuleEngine {
    pub fn new(rules: Vec<RedirectRule>) -> Self {
        Self { rules }
    }

    /// Load `[[rules]]` from a configuration file.
    pub fn from_file(path: &str) -> Result<Self, AppError> {
        let file: RedirectRulesFile = service_core::config::load_file(path)?;
        tracing::info!(path, rules = file.rules.len(), "Redirect rules loaded");
        Ok(Self::new(file.rules))
    }

    /// First rule that applies to the response, if any.
    pub fn evaluate(
        &self,
        status: Option<StatusCode>,
        route: &RouteFacts<'_>,
        request: &RequestContext,
    ) -> Option<RedirectMatch> {
        let Some(status) = status else {
            tracing::warn!(path = %request.path, "No response to evaluate redirects against");
            return None;
        };

        let request_path = normalize_path(&request.path);
        let route_path = normalize_path(route.path);

        let (index, rule) = self.rules.iter().enumerate().find(|(index, rule)| {
            if normalize_path(rule.target_path()) == request_path {
                tracing::info!(rule = index, path = %request.path, "Redirect rule skipped by loop guard");
                return false;
            }
            rule_applies(rule, status, route, &route_path)
        })?;

        match build_match(index, rule, request) {
            Ok(found) => {
                tracing::info!(
                    rule = index,
                    status = found.status.as_u16(),
                    location = %found.location,
                    "Redirect rule matched"
                );
                Some(found)
            }
            Err(e) => {
                tracing::warn!(rule = index, error = %e, "Redirect rule could not be applied");
                None
            }
        }
    }
}

fn rule_applies(
    rule: &RedirectRule,
    status: StatusCode,
    route: &RouteFacts<'_>,
    route_path: &str,
) -> bool {
    if let Some(group) = rule.group.as_deref() {
        match route.group {
            Some(tag) if tag.eq_ignore_ascii_case(group) => {}
            _ => return false,
        }
    }

    if !rule.statuses.is_empty() && !rule.statuses.iter().any(|p| p.matches(status)) {
        return false;
    }

    if let Some(source_path) = rule.source_path.as_deref() {
        if source_path != route_path {
            return false;
        }
    }

    if let Some(method) = rule.method.as_ref() {
        if *method != route.method {
            return false;
        }
    }

    true
}

fn build_match(
    index: usize,
    rule: &RedirectRule,
    request: &RequestContext,
) -> Result<RedirectMatch, anyhow::Error> {
    let params: Vec<(&str, String)> = rule
        .directives
        .iter()
        .filter_map(|d| d.resolve(&request.directives).map(|v| (d.param_name(), v)))
        .collect();

    let mut headers = HeaderMap::new();
    let carries_query = request.method == Method::GET || request.method == Method::HEAD;

    let location = if carries_query || params.is_empty() {
        append_query(&rule.target, &serde_urlencoded::to_string(&params)?)
    } else {
        let map: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
            .collect();
        headers.insert(
            HeaderName::from_static(REDIRECTED_PARAMS_HEADER),
            HeaderValue::from_str(&serde_json::to_string(&map)?)?,
        );
        rule.target.clone()
    };

    headers.insert(header::LOCATION, HeaderValue::from_str(&location)?);

    match HeaderValue::from_str(&request.source_url()) {
        Ok(source) => {
            headers.insert(HeaderName::from_static(REDIRECTED_SOURCE_HEADER), source);
        }
        Err(_) => tracing::warn!("Referring URL is not a valid header value"),
    }

    Ok(RedirectMatch {
        rule_index: index,
        status: rule.kind.status(),
        location,
        headers,
    })
}

fn append_query(target: &str, query: &str) -> String {
    if query.is_empty() {
        return target.to_string();
    }

    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };

    match fragment {
        Some(fragment) => format!("{}{}{}#{}", base, separator, query, fragment),
        None => format!("{}{}{}", base, separator, query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::directive::RedirectDirective;
    use crate::redirect::rule::{RedirectKind, RedirectRuleConfig};
    use crate::redirect::status::StatusPredicate;
    use uuid::Uuid;

    fn rule(group: Option<&str>, status: &[&str], target: &str) -> RedirectRuleConfig {
        RedirectRuleConfig {
            group: group.map(String::from),
            path: None,
            method: None,
            status: status.iter().map(|s| s.parse().unwrap()).collect(),
            target: target.to_string(),
            kind: RedirectKind::Temporary,
            directives: vec![RedirectDirective::PreviousRequestId],
        }
    }

    fn engine(configs: Vec<RedirectRuleConfig>) -> RedirectRuleEngine {
        RedirectRuleEngine::new(
            configs
                .into_iter()
                .map(|c| RedirectRule::new(c).unwrap())
                .collect(),
        )
    }

    fn request(method: Method, path: &str) -> RequestContext {
        RequestContext {
            method,
            path: path.to_string(),
            query: None,
            directives: DirectiveContext {
                request_id: Some("req-42".to_string()),
                session_id: Some("sess-1".to_string()),
                user_id: None,
            },
        }
    }

    fn dashboard_route() -> RouteFacts<'static> {
        RouteFacts {
            method: Method::GET,
            path: "/dashboard",
            group: Some("dashboard"),
        }
    }

    #[test]
    fn test_dashboard_error_redirect() {
        let engine = engine(vec![rule(Some("dashboard"), &["non-2xx"], "/dashboard/error")]);

        let found = engine
            .evaluate(
                Some(StatusCode::INTERNAL_SERVER_ERROR),
                &dashboard_route(),
                &request(Method::GET, "/dashboard"),
            )
            .unwrap();

        assert_eq!(found.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(found.location, "/dashboard/error?req_id=req-42");
        assert_eq!(found.headers[REDIRECTED_SOURCE_HEADER], "/dashboard");
    }

    #[test]
    fn test_success_does_not_match_non_2xx() {
        let engine = engine(vec![rule(Some("dashboard"), &["non-2xx"], "/dashboard/error")]);

        assert!(engine
            .evaluate(
                Some(StatusCode::OK),
                &dashboard_route(),
                &request(Method::GET, "/dashboard"),
            )
            .is_none());
    }

    #[test]
    fn test_group_tag_compared_case_insensitively() {
        let engine = engine(vec![rule(Some("DashBoard"), &[], "/elsewhere")]);

        assert!(engine
            .evaluate(
                Some(StatusCode::OK),
                &dashboard_route(),
                &request(Method::GET, "/dashboard"),
            )
            .is_some());

        let untagged = RouteFacts {
            group: None,
            ..dashboard_route()
        };
        assert!(engine
            .evaluate(
                Some(StatusCode::OK),
                &untagged,
                &request(Method::GET, "/dashboard"),
            )
            .is_none());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let engine = engine(vec![
            rule(Some("billing"), &[], "/billing"),
            rule(None, &["5xx"], "/first"),
            rule(None, &["any"], "/second"),
        ]);

        let found = engine
            .evaluate(
                Some(StatusCode::BAD_GATEWAY),
                &dashboard_route(),
                &request(Method::GET, "/dashboard"),
            )
            .unwrap();

        assert_eq!(found.rule_index, 1);
        assert!(found.location.starts_with("/first"));
    }

    #[test]
    fn test_loop_guard_skips_self_redirect() {
        let engine = engine(vec![
            rule(None, &["any"], "/Dashboard/./"),
            rule(None, &["any"], "/fallback"),
        ]);

        let found = engine
            .evaluate(
                Some(StatusCode::OK),
                &dashboard_route(),
                &request(Method::GET, "/dashboard"),
            )
            .unwrap();
        assert_eq!(found.rule_index, 1);

        let only_loop = engine_loop_only();
        assert!(only_loop
            .evaluate(
                Some(StatusCode::OK),
                &dashboard_route(),
                &request(Method::GET, "/dashboard?x=1"),
            )
            .is_none());
    }

    fn engine_loop_only() -> RedirectRuleEngine {
        engine(vec![rule(None, &["any"], "/dashboard")])
    }

    #[test]
    fn test_absent_response_is_no_redirect() {
        let engine = engine(vec![rule(None, &["any"], "/x")]);
        assert!(engine
            .evaluate(None, &dashboard_route(), &request(Method::GET, "/dashboard"))
            .is_none());
    }

    #[test]
    fn test_source_path_and_method() {
        let mut cfg = rule(None, &[], "/users/moved");
        cfg.path = Some("/users/:id/".to_string());
        cfg.method = Some("POST".to_string());
        let engine = engine(vec![cfg]);

        let post_route = RouteFacts {
            method: Method::POST,
            path: "/users/:id",
            group: None,
        };
        let get_route = RouteFacts {
            method: Method::GET,
            ..post_route.clone()
        };

        assert!(engine
            .evaluate(Some(StatusCode::OK), &post_route, &request(Method::POST, "/users/7"))
            .is_some());
        assert!(engine
            .evaluate(Some(StatusCode::OK), &get_route, &request(Method::GET, "/users/7"))
            .is_none());
    }

    #[test]
    fn test_method_only_rule() {
        let mut cfg = rule(None, &[], "/read-only");
        cfg.method = Some("DELETE".to_string());
        let engine = engine(vec![cfg]);

        let delete_route = RouteFacts {
            method: Method::DELETE,
            path: "/anything",
            group: None,
        };
        assert!(engine
            .evaluate(Some(StatusCode::OK), &delete_route, &request(Method::DELETE, "/anything"))
            .is_some());
        assert!(engine
            .evaluate(Some(StatusCode::OK), &dashboard_route(), &request(Method::GET, "/dashboard"))
            .is_none());
    }

    #[test]
    fn test_non_get_carries_params_in_header() {
        let mut cfg = rule(None, &["any"], "/done");
        cfg.directives = vec![
            RedirectDirective::PreviousRequestId,
            RedirectDirective::SessionId,
            RedirectDirective::SessionUserId,
        ];
        let engine = engine(vec![cfg]);

        let mut req = request(Method::POST, "/auth/login");
        req.query = Some("next=%2Fhome".to_string());
        let route = RouteFacts {
            method: Method::POST,
            path: "/auth/login",
            group: None,
        };

        let found = engine.evaluate(Some(StatusCode::OK), &route, &req).unwrap();

        assert_eq!(found.location, "/done");
        let params: serde_json::Value =
            serde_json::from_slice(found.headers[REDIRECTED_PARAMS_HEADER].as_bytes()).unwrap();
        assert_eq!(params["req_id"], "req-42");
        assert_eq!(params["session_id"], "sess-1");
        assert!(params.get("session_user_id").is_none());
        assert_eq!(
            found.headers[REDIRECTED_SOURCE_HEADER],
            "/auth/login?next=%2Fhome"
        );
    }

    #[test]
    fn test_query_appended_to_existing_query() {
        let mut cfg = rule(None, &["any"], "/target?tab=errors#details");
        let user_id = Uuid::new_v4();
        cfg.directives = vec![RedirectDirective::SessionUserId];
        let engine = engine(vec![cfg]);

        let mut req = request(Method::HEAD, "/dashboard");
        req.directives.user_id = Some(user_id);

        let found = engine
            .evaluate(Some(StatusCode::OK), &dashboard_route(), &req)
            .unwrap();
        assert_eq!(
            found.location,
            format!("/target?tab=errors&session_user_id={}#details", user_id)
        );
    }

    #[test]
    fn test_redirect_keeps_set_cookie() {
        let engine = engine(vec![rule(None, &["any"], "/x")]);
        let found = engine
            .evaluate(
                Some(StatusCode::OK),
                &dashboard_route(),
                &request(Method::GET, "/dashboard"),
            )
            .unwrap();

        let mut original = StatusCode::OK.into_response();
        original
            .headers_mut()
            .append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        original
            .headers_mut()
            .append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let response = found.into_response(&original);
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/x?req_id=req-42");
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_rules_deserialize_from_toml_shape() {
        let file: RedirectRulesFile = serde_json::from_value(serde_json::json!({
            "rules": [{
                "group": "dashboard",
                "status": ["non-2xx"],
                "target": "/dashboard/error",
                "directives": ["previous-request-id"]
            }]
        }))
        .unwrap();

        assert_eq!(file.rules.len(), 1);
        assert_eq!(file.rules[0].statuses, vec![StatusPredicate::NonSuccess]);
        assert_eq!(file.rules[0].kind, RedirectKind::Temporary);
    }

    #[test]
    fn test_unsafe_target_fails_to_load() {
        let result: Result<RedirectRulesFile, _> = serde_json::from_value(serde_json::json!({
            "rules": [{ "target": "https://evil.example" }]
        }));
        assert!(result.is_err());
    }
}
