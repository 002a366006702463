use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use headers::authorization::Bearer;
use headers::{Authorization, HeaderMapExt};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::router::KeeperState;

fn secret_matches(candidate: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()))
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized", "reason": reason})),
    )
        .into_response()
}

/// Ensure the inbound request carries the app key.
/// Accepts either:
/// - Header: `x-api-key: ...`
/// - Header: `Authorization: Bearer ...`
/// - Query string: `?key=...`
pub fn ensure_authorized(
    headers: &HeaderMap,
    query: Option<&str>,
    expected: &str,
) -> Result<(), Response> {
    // 1) header: x-api-key
    if let Some(hv) = headers.get("x-api-key").and_then(|v| v.to_str().ok())
        && secret_matches(hv, expected)
    {
        return Ok(());
    }

    // 2) header: Authorization: Bearer <key>
    if let Some(auth) = headers.typed_get::<Authorization<Bearer>>()
        && secret_matches(auth.token(), expected)
    {
        return Ok(());
    }

    // 3) query: key=...
    if let Some(qs) = query {
        for (k, v) in url::form_urlencoded::parse(qs.as_bytes()) {
            if k == "key" && secret_matches(&v, expected) {
                return Ok(());
            }
        }
    }

    Err(unauthorized("invalid or missing key"))
}

/// Internal routes called through the first-party auth gateway.
#[derive(Debug, Clone, Copy)]
pub struct RequireAppKey;

impl FromRequestParts<KeeperState> for RequireAppKey {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &KeeperState,
    ) -> Result<Self, Self::Rejection> {
        ensure_authorized(&parts.headers, parts.uri.query(), &state.config.app_key)?;
        Ok(Self)
    }
}

/// Machine-to-machine trigger: `Authorization: Bearer <cron_secret>` only.
#[derive(Debug, Clone, Copy)]
pub struct RequireCronSecret;

impl FromRequestParts<KeeperState> for RequireCronSecret {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &KeeperState,
    ) -> Result<Self, Self::Rejection> {
        match parts.headers.typed_get::<Authorization<Bearer>>() {
            Some(auth) if secret_matches(auth.token(), &state.config.cron_secret) => Ok(Self),
            _ => Err(unauthorized("invalid or missing cron secret")),
        }
    }
}
