use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context value a redirect rule asks to carry over to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectDirective {
    PreviousRequestId,
    SessionId,
    SessionUserId,
}

/// Facts about the triggering request that directives draw from.
#[derive(Debug, Clone, Default)]
pub struct DirectiveContext {
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<Uuid>,
}

impl RedirectDirective {
    /// Query parameter / JSON key the value travels under.
    pub fn param_name(&self) -> &'static str {
        match self {
            RedirectDirective::PreviousRequestId => "req_id",
            RedirectDirective::SessionId => "session_id",
            RedirectDirective::SessionUserId => "session_user_id",
        }
    }

    /// Value for this directive, or `None` when there is nothing to carry.
    pub fn resolve(&self, ctx: &DirectiveContext) -> Option<String> {
        let value = match self {
            RedirectDirective::PreviousRequestId => ctx.request_id.clone(),
            RedirectDirective::SessionId => ctx.session_id.clone(),
            RedirectDirective::SessionUserId => ctx.user_id.map(|id| id.to_string()),
        };
        value.filter(|v| !v.is_empty())
    }
}
