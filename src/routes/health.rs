//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health`: liveness probe.
///
/// Reports uptime, version and the number of open terminal sessions. Does not
/// touch the process supervisor, so it stays fast when pm2 is wedged.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let terminals = state.terminals.session_count().await;

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "terminal_sessions": terminals,
    }))
}
