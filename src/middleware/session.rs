use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::service::session_bridge::FirstPartySession;

/// Subject id header injected by the first-party auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

impl<S> FromRequestParts<S> for FirstPartySession
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let Some(subject_id) = header(USER_ID_HEADER) else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthenticated", "reason": "missing first-party session"})),
            )
                .into_response());
        };

        Ok(FirstPartySession {
            subject_id,
            email: header(USER_EMAIL_HEADER),
        })
    }
}
