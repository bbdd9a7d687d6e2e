//! Operator sessions and role checks.
//!
//! Credentials are issued elsewhere; this module only looks up an existing
//! session token and decides whether its role is high enough. A token is
//! accepted from, in order: the session cookie, an `Authorization: Bearer`
//! header, or a `?token=` query parameter (browsers can't set headers on
//! WebSocket upgrades).

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::OperatorConfig;
use crate::AppState;

/// Privilege tiers, lowest first. Comparisons follow declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

/// An established operator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    pub username: String,
    pub role: Role,
}

impl AuthSession {
    pub fn allows(&self, required: Role) -> bool {
        self.role >= required
    }
}

/// Read-only view of sessions created by the login layer.
pub trait SessionStore: Send + Sync {
    fn lookup(&self, token: &str) -> Option<AuthSession>;
}

/// Sessions fixed at startup from `[[auth.operators]]`.
pub struct StaticSessionStore {
    entries: Vec<(String, AuthSession)>,
}

impl StaticSessionStore {
    pub fn new(operators: &[OperatorConfig]) -> Self {
        let entries = operators
            .iter()
            .filter(|op| !op.token.is_empty())
            .map(|op| {
                (
                    op.token.clone(),
                    AuthSession {
                        username: op.username.clone(),
                        role: op.role,
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

impl SessionStore for StaticSessionStore {
    fn lookup(&self, token: &str) -> Option<AuthSession> {
        if token.is_empty() {
            return None;
        }
        // Compare against every entry so timing doesn't reveal which one matched.
        let mut found = None;
        for (expected, session) in &self.entries {
            if constant_time_eq(expected.as_bytes(), token.as_bytes()) && found.is_none() {
                found = Some(session.clone());
            }
        }
        found
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull a session token out of request metadata.
pub fn session_token(headers: &HeaderMap, uri: &Uri, cookie_name: &str) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string());
    if from_cookie.is_some() {
        return from_cookie;
    }

    let from_bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(ToString::to_string);
    if from_bearer.is_some() {
        return from_bearer;
    }

    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller's session, if any.
pub fn authenticate(
    store: &dyn SessionStore,
    headers: &HeaderMap,
    uri: &Uri,
    cookie_name: &str,
) -> Option<AuthSession> {
    session_token(headers, uri, cookie_name).and_then(|token| store.lookup(&token))
}

async fn require_role(state: &AppState, required: Role, mut request: Request, next: Next) -> Response {
    let session = authenticate(
        state.sessions.as_ref(),
        request.headers(),
        request.uri(),
        &state.config.auth.cookie_name,
    );
    let Some(session) = session else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Authentication required", "code": "UNAUTHENTICATED"})),
        )
            .into_response();
    };
    if !session.allows(required) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": format!("Requires role {}", required.as_str()),
                "code": "FORBIDDEN",
            })),
        )
            .into_response();
    }

    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Middleware: any authenticated operator.
pub async fn require_staff(State(state): State<AppState>, request: Request, next: Next) -> Response {
    require_role(&state, Role::Staff, request, next).await
}

pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    require_role(&state, Role::Admin, request, next).await
}

pub async fn require_super_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    require_role(&state, Role::SuperAdmin, request, next).await
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so an attacker cannot determine the token length from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        let p = provided.get(i).copied().unwrap_or(0xff);
        diff |= e ^ p;
    }
    diff == 0
}
