use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;
use tower_sessions::Session;

use crate::redirect::{history, DirectiveContext, RedirectHistoryEntry, RequestContext, RouteFacts};
use crate::routes::IdentityRequirement;
use crate::services::{Evidence, RequestAuthCache};
use crate::session::SessionState;
use crate::AppState;

/// Per-request coordination: resolve identity, reject early on routes that
/// require one, run the handler, then let the redirect rules have a say on
/// the produced response.
pub async fn request_lifecycle_middleware(
    State(state): State<AppState>,
    matched: Option<MatchedPath>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(String::from);
    let canonical = matched
        .as_ref()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let route = state.routes.lookup(&method, &canonical).cloned();
    let requirement = route
        .as_ref()
        .map(|r| r.identity)
        .unwrap_or(IdentityRequirement::Optional);
    let request_id = req.extensions().get::<RequestId>().map(|r| r.0.clone());

    let cache = RequestAuthCache::new();
    req.extensions_mut().insert(cache.clone());
    let session = req.extensions().get::<Session>().cloned();
    let session_state = session.as_ref().map(|s| s as &dyn SessionState);

    if state.resolver.is_bypassed(&path) {
        tracing::debug!(path = %path, "Identity resolution bypassed");
    } else {
        let credential = state.codec.credential_from_request(req.headers());
        let evidence = Evidence {
            cache: &cache,
            session: session_state,
            credential: credential.as_deref(),
        };

        match state.resolver.resolve(&evidence).await {
            Ok(Some(identity)) => {
                tracing::debug!(
                    user_id = %identity.user.user_id,
                    provenance = ?identity.provenance,
                    "Identity resolved"
                );
                req.extensions_mut().insert(identity);
            }
            Ok(None) if requirement == IdentityRequirement::Required => {
                return AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
                    .into_response();
            }
            Ok(None) => {}
            Err(e) if requirement == IdentityRequirement::Required => {
                tracing::info!(path = %path, error = %e, "Rejected credential on protected route");
                return AppError::from(e).into_response();
            }
            Err(e) if e.is_credential_failure() => {
                tracing::info!(path = %path, error = %e, "Ignoring invalid credential on optional route");
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Identity unavailable, continuing anonymously");
            }
        }
    }

    let response = next.run(req).await;

    let request = RequestContext {
        method: method.clone(),
        path,
        query,
        directives: DirectiveContext {
            request_id: request_id.clone(),
            session_id: session_state.and_then(|s| s.id()),
            user_id: cache.user().map(|u| u.user_id),
        },
    };
    let facts = RouteFacts {
        method,
        path: &canonical,
        group: route.as_ref().and_then(|r| r.group.as_deref()),
    };

    let Some(redirect) = state
        .redirects
        .evaluate(Some(response.status()), &facts, &request)
    else {
        return response;
    };

    if let Some(session) = session_state {
        let entry = RedirectHistoryEntry {
            from: request.source_url(),
            to: redirect.location.clone(),
            status: redirect.status.as_u16(),
            request_id,
            at: Utc::now(),
        };
        if let Err(e) = history::record(session, entry, state.config.redirect.history_limit).await {
            tracing::warn!(error = %e, "Failed to record redirect history");
        }
    }

    redirect.into_response(&response)
}
