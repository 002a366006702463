use axum::{Json, http::StatusCode, response::IntoResponse};
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::time::Duration;
use thiserror::Error as ThisError;

pub type OauthTokenError = RequestTokenError<
    HttpClientError<ReqwestClientError>,
    StandardErrorResponse<BasicErrorResponseType>,
>;

/// Outcome classes of a refresh-token exchange.
///
/// `Revoked` is terminal for one credential, `Misconfigured` is terminal for the whole
/// deployment, `Transient` and `TimedOut` may succeed on a later attempt.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RefreshError {
    #[error("credential has no refresh token; re-authorization required")]
    MissingRefreshToken,

    #[error("refresh token rejected with invalid_grant; re-authorization required")]
    Revoked { description: Option<String> },

    #[error("provider rejected the OAuth client ({error}); check client id/secret")]
    Misconfigured { error: String },

    #[error("provider rejected refresh: {error}")]
    Rejected { error: String },

    #[error("transient refresh failure: {0}")]
    Transient(String),

    #[error("refresh timed out after {0:?}")]
    TimedOut(Duration),
}

impl RefreshError {
    /// Worth retrying inside the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RefreshError::Transient(_))
    }

    /// The credential is dead until the end user consents again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            RefreshError::Revoked { .. } | RefreshError::MissingRefreshToken
        )
    }

    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, RefreshError::Misconfigured { .. })
    }
}

impl From<OauthTokenError> for RefreshError {
    fn from(e: OauthTokenError) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => match err.error() {
                BasicErrorResponseType::InvalidGrant => RefreshError::Revoked {
                    description: err.error_description().cloned(),
                },
                BasicErrorResponseType::InvalidClient
                | BasicErrorResponseType::UnauthorizedClient => RefreshError::Misconfigured {
                    error: err.error().to_string(),
                },
                // RFC 6749 codes sent with 5xx bodies.
                BasicErrorResponseType::Extension(code)
                    if code == "server_error" || code == "temporarily_unavailable" =>
                {
                    RefreshError::Transient(format!("token endpoint unavailable: {code}"))
                }
                other => RefreshError::Rejected {
                    error: other.to_string(),
                },
            },
            RequestTokenError::Request(req_e) => {
                RefreshError::Transient(format!("request failed: {req_e}"))
            }
            // 5xx pages and other non-OAuth bodies end up here.
            RequestTokenError::Parse(parse_err, _body) => {
                RefreshError::Transient(format!("unparseable token response: {parse_err}"))
            }
            RequestTokenError::Other(s) => RefreshError::Transient(s),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum KeeperError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("OAuth2 code exchange error: {0}")]
    CodeExchange(String),

    #[error("OAuth flow error: {0}")]
    OauthFlow(String),

    #[error("Provider authorization required")]
    ReauthRequired,

    #[error("Invalid credential file: {0}")]
    InvalidCredential(String),

    #[error("Ractor error: {0}")]
    Actor(String),

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),
}

impl From<OauthTokenError> for KeeperError {
    fn from(e: OauthTokenError) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => KeeperError::CodeExchange(format!(
                "{}{}",
                err.error(),
                err.error_description()
                    .map(|d| format!(": {d}"))
                    .unwrap_or_default()
            )),
            other => KeeperError::Refresh(other.into()),
        }
    }
}

impl IntoResponse for KeeperError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            KeeperError::ReauthRequired
            | KeeperError::Refresh(
                RefreshError::Revoked { .. } | RefreshError::MissingRefreshToken,
            ) => (
                StatusCode::UNAUTHORIZED,
                "REAUTHORIZATION_REQUIRED",
                "Google authorization is missing or expired; please reconnect your account.",
            ),
            KeeperError::Refresh(RefreshError::Misconfigured { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROVIDER_MISCONFIGURED",
                "The OAuth client is misconfigured.",
            ),
            KeeperError::Refresh(RefreshError::Rejected { .. }) => (
                StatusCode::BAD_GATEWAY,
                "REFRESH_REJECTED",
                "The provider rejected the token refresh.",
            ),
            KeeperError::Refresh(RefreshError::Transient(_) | RefreshError::TimedOut(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDER_UNAVAILABLE",
                "The provider is temporarily unavailable.",
            ),
            KeeperError::CodeExchange(_) | KeeperError::OauthFlow(_) => (
                StatusCode::BAD_REQUEST,
                "OAUTH_FLOW_ERROR",
                "The authorization flow could not be completed.",
            ),
            KeeperError::Reqwest(_) | KeeperError::UrlParse(_) => (
                StatusCode::BAD_GATEWAY,
                "BAD_GATEWAY",
                "Upstream service is unavailable.",
            ),
            KeeperError::UpstreamStatus(code) => {
                let (err_code, msg) = match code {
                    StatusCode::TOO_MANY_REQUESTS => {
                        ("RATE_LIMIT", "Upstream rate limit exceeded.")
                    }
                    StatusCode::UNAUTHORIZED => (
                        "REAUTHORIZATION_REQUIRED",
                        "Upstream rejected the access token; please reconnect your account.",
                    ),
                    StatusCode::FORBIDDEN => ("FORBIDDEN", "Upstream permission denied."),
                    StatusCode::NOT_FOUND => ("NOT_FOUND", "Upstream resource not found."),
                    _ => ("UPSTREAM_ERROR", "An upstream error occurred."),
                };
                (code, err_code, msg)
            }
            KeeperError::Json(_)
            | KeeperError::Io(_)
            | KeeperError::Database(_)
            | KeeperError::InvalidCredential(_)
            | KeeperError::Actor(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.",
            ),
        };
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(RefreshError::Transient("reset".into()).is_retryable());
        assert!(!RefreshError::TimedOut(Duration::from_secs(1)).is_retryable());
        assert!(!RefreshError::Revoked { description: None }.is_retryable());
        assert!(
            !RefreshError::Misconfigured {
                error: "invalid_client".into()
            }
            .is_retryable()
        );
    }

    fn server_response(code: BasicErrorResponseType) -> OauthTokenError {
        RequestTokenError::ServerResponse(StandardErrorResponse::new(code, None, None))
    }

    #[test]
    fn oauth_error_codes_are_classified() {
        assert!(matches!(
            RefreshError::from(server_response(BasicErrorResponseType::InvalidGrant)),
            RefreshError::Revoked { .. }
        ));
        assert!(
            RefreshError::from(server_response(BasicErrorResponseType::UnauthorizedClient))
                .is_misconfiguration()
        );
        for code in ["server_error", "temporarily_unavailable"] {
            let err = RefreshError::from(server_response(BasicErrorResponseType::Extension(
                code.to_string(),
            )));
            assert!(err.is_retryable(), "{code} -> {err:?}");
        }
        assert!(matches!(
            RefreshError::from(server_response(BasicErrorResponseType::InvalidScope)),
            RefreshError::Rejected { .. }
        ));
    }

    #[test]
    fn revoked_maps_to_reauthorization_response() {
        let resp = KeeperError::Refresh(RefreshError::Revoked { description: None }).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = KeeperError::Refresh(RefreshError::Misconfigured {
            error: "invalid_client".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
