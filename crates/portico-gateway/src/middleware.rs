use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::warn;

/// Header carrying the caller identity used to scope adapters.
pub const CREATOR_HEADER: &str = "x-user-id";

/// Identity used when no `X-User-Id` header is present.
pub const ANONYMOUS: &str = "anonymous";

/// Auth configuration for the gateway.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// API keys that are allowed to connect. Empty = no auth required.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Returns true if authentication is enabled (at least one key configured).
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| constant_time_eq(k, key))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    pub api_key: Option<String>,
}

/// Auth middleware: validates API key from header or query param.
///
/// Checks `Authorization: Bearer <key>` header first, then `?api_key=<key>` query param.
/// If no API keys are configured, all requests are allowed.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    query: Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.api_key.clone());

    match key {
        Some(k) if auth.accepts(&k) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            unauthorized("Invalid API key")
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            unauthorized("API key required")
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// Caller identity taken from `X-User-Id`, `anonymous` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Creator {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let creator = parts
            .headers
            .get(CREATOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS);
        Ok(Self(creator.to_string()))
    }
}
