//! HTTP route handlers and router assembly.
//!
//! Routes are grouped by the minimum role they need; each group carries its
//! own role middleware. The terminal upgrade is not role-layered, because the
//! connection gate does its own check before the upgrade is accepted. Upgrade
//! requests anywhere else are refused before routing.

pub mod apps;
pub mod audit;
pub mod health;
pub mod system;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::{require_admin, require_staff, require_super_admin};
use crate::gate::reject_stray_upgrades;
use crate::ws;
use crate::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health::health));

    let staff_routes = Router::new()
        .route("/api/apps", get(apps::list_apps))
        .route("/api/apps/{name}/logs", get(apps::app_logs))
        .route("/api/system", get(system::system))
        .layer(middleware::from_fn_with_state(state.clone(), require_staff));

    let admin_routes = Router::new()
        .route("/api/apps/{name}/flush-logs", post(apps::flush_logs))
        .route("/api/apps/{name}/{action}", post(apps::app_action))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let super_admin_routes = Router::new()
        .route("/api/apps", post(apps::add_app))
        .route("/api/apps/{name}", delete(apps::remove_app))
        .route("/api/apps/{name}/toggle-watch", post(apps::toggle_watch))
        .route("/api/check-env", get(apps::check_env))
        .route("/api/audit", get(audit::get_audit))
        .route("/api/terminals", get(audit::list_terminals))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_super_admin,
        ));

    let terminal_route = Router::new().route(&state.config.terminal.path, get(ws::terminal_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(staff_routes)
        .merge(admin_routes)
        .merge(super_admin_routes)
        .merge(terminal_route)
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), reject_stray_upgrades))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Not found", "code": "NOT_FOUND"})),
    )
        .into_response()
}
