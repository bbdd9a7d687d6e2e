//! Audit trail and live terminal listing.
//!
//! `GET /api/audit?since_id=N&limit=N` returns recorded operator actions.
//! Without `since_id` the newest `limit` entries are returned.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::AppState;

const MAX_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct AuditQuery {
    pub since_id: Option<u64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /api/audit`
pub async fn get_audit(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> Json<Value> {
    let limit = query.limit.min(MAX_LIMIT);
    let entries = match query.since_id {
        Some(since) => state.audit.read_since(since, limit).await,
        None => state.audit.recent(limit).await,
    };
    Json(json!({ "entries": entries }))
}

/// `GET /api/terminals`: open terminal sessions.
pub async fn list_terminals(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "sessions": state.terminals.list().await }))
}
