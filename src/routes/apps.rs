//! Managed application endpoints.
//!
//! Thin adapters over [`crate::supervisor::SupervisorClient`]: every decision
//! about validity lives there, and its [`AppError`] is the response on failure.
//! Successful mutations and log views are written to the audit trail.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::audit::AuditAction;
use crate::auth::AuthSession;
use crate::error::AppError;
use crate::supervisor::AddRequest;
use crate::AppState;

/// `GET /api/apps`
pub async fn list_apps(State(state): State<AppState>) -> Json<Value> {
    let apps = state.supervisor.list().await;
    Json(json!({ "apps": apps }))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// `GET /api/apps/{name}/logs?lines=N`
pub async fn app_logs(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthSession>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, AppError> {
    let logs = state.supervisor.logs(&name, query.lines).await?;
    state
        .audit
        .record(&operator.username, AuditAction::AppLogs, &name, None)
        .await;
    Ok(Json(json!({ "name": name, "logs": logs })))
}

/// `POST /api/apps/{name}/{action}` with action one of start, stop, restart.
pub async fn app_action(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthSession>,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let (performed, output) = state.supervisor.act(&name, &action).await?;
    state
        .audit
        .record(
            &operator.username,
            AuditAction::for_lifecycle(performed),
            &name,
            None,
        )
        .await;
    Ok(Json(json!({ "name": name, "action": performed.as_str(), "output": output })))
}

/// `POST /api/apps/{name}/flush-logs`
pub async fn flush_logs(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthSession>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.supervisor.flush_logs(&name).await?;
    state
        .audit
        .record(&operator.username, AuditAction::AppFlushLogs, &name, None)
        .await;
    Ok(Json(json!({ "name": name, "flushed": true })))
}

/// `POST /api/apps/{name}/toggle-watch`
pub async fn toggle_watch(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthSession>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let watch = state.supervisor.toggle_watch(&name).await?;
    state
        .audit
        .record(
            &operator.username,
            AuditAction::AppToggleWatch,
            &name,
            Some(format!("watch={watch}")),
        )
        .await;
    Ok(Json(json!({ "name": name, "watch": watch })))
}

/// `POST /api/apps`: body `{name, script_path, env_text?}`.
pub async fn add_app(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthSession>,
    Json(req): Json<AddRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = state.supervisor.add(&req).await?;
    state
        .audit
        .record(
            &operator.username,
            AuditAction::AppAdd,
            &outcome.name,
            Some(outcome.script.display().to_string()),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!(outcome))))
}

/// `DELETE /api/apps/{name}`
pub async fn remove_app(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthSession>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.supervisor.remove(&name).await?;
    state
        .audit
        .record(&operator.username, AuditAction::AppRemove, &name, None)
        .await;
    Ok(Json(json!({ "name": name, "removed": true })))
}

#[derive(Deserialize)]
pub struct CheckEnvQuery {
    pub script: String,
}

/// `GET /api/check-env?script=<path>`
pub async fn check_env(
    State(state): State<AppState>,
    Query(query): Query<CheckEnvQuery>,
) -> Result<Json<Value>, AppError> {
    let check = state.supervisor.check_env(&query.script)?;
    Ok(Json(json!(check)))
}
