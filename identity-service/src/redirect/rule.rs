use axum::http::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use super::directive::RedirectDirective;
use super::status::StatusPredicate;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("Redirect target must be a local absolute path: {0}")]
    NonLocalTarget(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKind {
    #[default]
    Temporary,
    Permanent,
}

impl RedirectKind {
    pub fn status(&self) -> StatusCode {
        match self {
            RedirectKind::Temporary => StatusCode::TEMPORARY_REDIRECT,
            RedirectKind::Permanent => StatusCode::PERMANENT_REDIRECT,
        }
    }
}

/// Rule as written in `redirects.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectRuleConfig {
    pub group: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub status: Vec<StatusPredicate>,
    pub target: String,
    #[serde(default)]
    pub kind: RedirectKind,
    #[serde(default)]
    pub directives: Vec<RedirectDirective>,
}

/// A validated redirect rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RedirectRuleConfig")]
pub struct RedirectRule {
    pub group: Option<String>,
    /// Normalized canonical route path.
    pub source_path: Option<String>,
    pub method: Option<Method>,
    pub statuses: Vec<StatusPredicate>,
    pub target: String,
    pub kind: RedirectKind,
    pub directives: Vec<RedirectDirective>,
}

impl RedirectRule {
    pub fn new(config: RedirectRuleConfig) -> Result<Self, RuleError> {
        if !is_local_path(&config.target) {
            return Err(RuleError::NonLocalTarget(config.target));
        }

        let method = config
            .method
            .map(|m| {
                Method::from_bytes(m.trim().to_uppercase().as_bytes())
                    .map_err(|_| RuleError::InvalidMethod(m))
            })
            .transpose()?;

        Ok(Self {
            group: config.group.filter(|g| !g.trim().is_empty()),
            source_path: config.path.as_deref().map(normalize_path),
            method,
            statuses: config.status,
            target: config.target,
            kind: config.kind,
            directives: config.directives,
        })
    }

    /// Path component of the target, without query or fragment.
    pub fn target_path(&self) -> &str {
        split_path(&self.target)
    }
}

impl TryFrom<RedirectRuleConfig> for RedirectRule {
    type Error = RuleError;

    fn try_from(config: RedirectRuleConfig) -> Result<Self, Self::Error> {
        RedirectRule::new(config)
    }
}

/// True for `/path` style targets that cannot leave the current origin.
pub fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.contains("://")
        && !target.chars().any(|c| c.is_control() || c.is_whitespace())
}

fn split_path(url: &str) -> &str {
    url.split(|c| c == '?' || c == '#').next().unwrap_or("")
}

/// Canonical form of a path for comparison: query and fragment dropped,
/// repeated slashes collapsed, dot segments resolved, no trailing slash,
/// lowercase.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in split_path(path).split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    format!("/{}", segments.join("/")).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: &str) -> RedirectRuleConfig {
        RedirectRuleConfig {
            group: None,
            path: None,
            method: None,
            status: vec![],
            target: target.to_string(),
            kind: RedirectKind::default(),
            directives: vec![],
        }
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/Dashboard/"), "/dashboard");
        assert_eq!(normalize_path("//a///b/./c/../d?x=1#top"), "/a/b/d");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/../.."), "/");
    }

    #[test]
    fn test_non_local_targets_rejected() {
        for target in [
            "https://evil.example",
            "//evil.example/path",
            "/\\evil.example",
            "dashboard",
            "/a b",
            "",
        ] {
            assert_eq!(
                RedirectRule::new(config(target)).unwrap_err(),
                RuleError::NonLocalTarget(target.to_string())
            );
        }
    }

    #[test]
    fn test_local_target_accepted() {
        let rule = RedirectRule::new(config("/dashboard/error?from=rule")).unwrap();
        assert_eq!(rule.target_path(), "/dashboard/error");
        assert_eq!(rule.kind.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[test]
    fn test_method_parsed() {
        let mut cfg = config("/x");
        cfg.method = Some("post".to_string());
        assert_eq!(RedirectRule::new(cfg).unwrap().method, Some(Method::POST));

        let mut cfg = config("/x");
        cfg.method = Some("NOT A METHOD".to_string());
        assert!(matches!(
            RedirectRule::new(cfg),
            Err(RuleError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_permanent_kind() {
        assert_eq!(
            RedirectKind::Permanent.status(),
            StatusCode::PERMANENT_REDIRECT
        );
    }
}
