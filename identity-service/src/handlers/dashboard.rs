use axum::{extract::Query, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{
    middleware::MaybeIdentity,
    models::UserResponse,
    redirect::history,
};

/// Summary of the caller as seen by this request.
pub async fn dashboard(
    MaybeIdentity(identity): MaybeIdentity,
    session: Option<Session>,
) -> Json<serde_json::Value> {
    let redirects = match session.as_ref() {
        Some(session) => history::load(session).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read redirect history");
            Vec::new()
        }),
        None => Vec::new(),
    };

    Json(serde_json::json!({
        "user": identity.as_ref().map(|i| UserResponse::from(&i.user)),
        "provenance": identity.as_ref().map(|i| i.provenance),
        "redirects": redirects,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ErrorPageQuery {
    pub req_id: Option<String>,
}

/// Landing page for failed dashboard requests.
pub async fn dashboard_error(Query(query): Query<ErrorPageQuery>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "The dashboard could not be displayed",
        "req_id": query.req_id,
    }))
}
