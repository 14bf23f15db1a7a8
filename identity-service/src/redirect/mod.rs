//! Post-response redirect decisions.

pub mod directive;
pub mod engine;
pub mod history;
pub mod rule;
pub mod status;

pub use directive::{DirectiveContext, RedirectDirective};
pub use engine::{
    RedirectMatch, RedirectRuleEngine, RequestContext, RouteFacts, REDIRECTED_PARAMS_HEADER,
    REDIRECTED_SOURCE_HEADER,
};
pub use history::RedirectHistoryEntry;
pub use rule::{normalize_path, RedirectKind, RedirectRule, RedirectRuleConfig, RuleError};
pub use status::StatusPredicate;
