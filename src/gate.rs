//! Connection gate for terminal upgrades.
//!
//! Runs before any PTY or process is allocated. It only reads an existing
//! session; it never creates one.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::auth::{authenticate, AuthSession, Role, SessionStore};
use crate::AppState;

/// Why an upgrade was refused. Every rejection closes the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    WrongPath,
    Unauthenticated,
    Forbidden { role: Role },
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::WrongPath => (StatusCode::NOT_FOUND, "Not Found"),
            Self::Unauthenticated | Self::Forbidden { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized")
            }
        };
        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

/// Authorize an upgrade to `expected_path` for a session of at least `required`.
pub fn authorize(
    uri: &Uri,
    headers: &HeaderMap,
    expected_path: &str,
    store: &dyn SessionStore,
    required: Role,
    cookie_name: &str,
) -> Result<AuthSession, GateRejection> {
    if uri.path() != expected_path {
        warn!("Rejected upgrade on {}", uri.path());
        return Err(GateRejection::WrongPath);
    }
    let Some(session) = authenticate(store, headers, uri, cookie_name) else {
        warn!("Rejected terminal upgrade: no session");
        return Err(GateRejection::Unauthenticated);
    };
    if !session.allows(required) {
        warn!(
            "Rejected terminal upgrade for {}: role {} below {}",
            session.username,
            session.role.as_str(),
            required.as_str()
        );
        return Err(GateRejection::Forbidden { role: session.role });
    }
    Ok(session)
}

/// True when the request asks for a WebSocket upgrade.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Middleware: refuse WebSocket upgrades on any path other than the terminal,
/// whether or not a route exists there.
pub async fn reject_stray_upgrades(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if is_upgrade(request.headers()) && request.uri().path() != state.config.terminal.path {
        warn!("Rejected upgrade on {}", request.uri().path());
        return GateRejection::WrongPath.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticSessionStore;
    use crate::config::OperatorConfig;

    fn store() -> StaticSessionStore {
        StaticSessionStore::new(&[
            OperatorConfig {
                token: "root-token".into(),
                username: "root".into(),
                role: Role::SuperAdmin,
            },
            OperatorConfig {
                token: "admin-token".into(),
                username: "ada".into(),
                role: Role::Admin,
            },
        ])
    }

    fn check(uri: &str) -> Result<AuthSession, GateRejection> {
        let uri: Uri = uri.parse().unwrap();
        authorize(
            &uri,
            &HeaderMap::new(),
            "/ws/terminal",
            &store(),
            Role::SuperAdmin,
            "opsdeck_session",
        )
    }

    #[test]
    fn test_wrong_path_checked_first() {
        assert_eq!(check("/ws/other?token=root-token"), Err(GateRejection::WrongPath));
        assert_eq!(check("/ws/terminal/extra"), Err(GateRejection::WrongPath));
    }

    #[test]
    fn test_missing_or_unknown_session() {
        assert_eq!(check("/ws/terminal"), Err(GateRejection::Unauthenticated));
        assert_eq!(check("/ws/terminal?token=bogus"), Err(GateRejection::Unauthenticated));
    }

    #[test]
    fn test_role_below_required_tier() {
        assert_eq!(
            check("/ws/terminal?token=admin-token"),
            Err(GateRejection::Forbidden { role: Role::Admin })
        );
    }

    #[test]
    fn test_super_admin_passes() {
        assert_eq!(check("/ws/terminal?token=root-token").unwrap().username, "root");
    }

    #[test]
    fn test_rejections_close_connection() {
        for rejection in [
            GateRejection::WrongPath,
            GateRejection::Unauthenticated,
            GateRejection::Forbidden { role: Role::Staff },
        ] {
            let response = rejection.clone().into_response();
            assert_eq!(response.headers()[header::CONNECTION], "close");
            let expected = if rejection == GateRejection::WrongPath {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::UNAUTHORIZED
            };
            assert_eq!(response.status(), expected);
        }
    }
}
