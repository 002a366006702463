//! In-process stand-in for Google's token, userinfo and Ads endpoints.
#![allow(dead_code)]

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use furriyadh_keeper::config::Config;
use furriyadh_keeper::db::{CredentialsStorage, StoredCredential, TokenTable};
use furriyadh_keeper::google_oauth::CredentialRecord;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const APP_KEY: &str = "app-key";
pub const CRON_SECRET: &str = "cron-secret";
pub const USERINFO_EMAIL: &str = "linked@furriyadh.com";

#[derive(Clone, Default)]
struct MockState {
    token_calls: Arc<AtomicUsize>,
}

pub struct MockGoogle {
    pub base: Url,
    token_calls: Arc<AtomicUsize>,
}

impl MockGoogle {
    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).expect("mock url")
    }

    /// Requests that reached the token endpoint so far.
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }
}

/// Token endpoint behaviour is keyed by the refresh token:
/// - `rt-revoked*` -> 400 invalid_grant
/// - `rt-badclient` -> 401 invalid_client
/// - `rt-flaky` -> 503 with an HTML body
/// - `rt-unavailable` -> 503 with `temporarily_unavailable`
/// - `rt-hang` -> answers only after 10s
/// - `rt-slow` -> success after 300ms
/// - `rt-rotate` -> success with a rotated refresh token
/// - anything else -> 200, access token is the refresh token minus its `rt-` prefix
pub async fn spawn_mock_google() -> MockGoogle {
    let state = MockState::default();
    let app = Router::new()
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .fallback(ads)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockGoogle {
        base: Url::parse(&format!("http://{addr}/")).expect("mock base"),
        token_calls: state.token_calls,
    }
}

fn oauth_error(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(json!({"error": error, "error_description": format!("mock {error}")})),
    )
        .into_response()
}

async fn token(State(state): State<MockState>, Form(form): Form<HashMap<String, String>>) -> Response {
    state.token_calls.fetch_add(1, Ordering::SeqCst);

    let field = |k: &str| form.get(k).map(String::as_str).unwrap_or_default();
    if field("client_id") != CLIENT_ID || field("client_secret") != CLIENT_SECRET {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client");
    }

    match field("grant_type") {
        "authorization_code" => {
            if field("code") != "good-code" || field("code_verifier").is_empty() {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant");
            }
            Json(json!({
                "access_token": "at-code",
                "refresh_token": "rt-code",
                "expires_in": 3599,
                "token_type": "Bearer",
                "scope": "openid https://www.googleapis.com/auth/adwords"
            }))
            .into_response()
        }
        "refresh_token" => {
            let rt = field("refresh_token").to_string();
            if rt.starts_with("rt-revoked") {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant");
            }
            match rt.as_str() {
                "rt-badclient" => oauth_error(StatusCode::UNAUTHORIZED, "invalid_client"),
                "rt-flaky" => (StatusCode::SERVICE_UNAVAILABLE, "<html>backend down</html>").into_response(),
                "rt-unavailable" => {
                    oauth_error(StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
                }
                _ => {
                    match rt.as_str() {
                        "rt-slow" => tokio::time::sleep(Duration::from_millis(300)).await,
                        "rt-hang" => tokio::time::sleep(Duration::from_secs(10)).await,
                        _ => {}
                    }
                    let mut body = json!({
                        "access_token": rt.strip_prefix("rt-").unwrap_or(&rt),
                        "expires_in": 3600,
                        "token_type": "Bearer"
                    });
                    if rt == "rt-rotate" {
                        body["refresh_token"] = json!("rt-rotated");
                    }
                    Json(body).into_response()
                }
            }
        }
        _ => oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type"),
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn userinfo(headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Some(_) => Json(json!({
            "id": "g-1",
            "email": USERINFO_EMAIL,
            "verified_email": true,
            "name": "Linked User"
        }))
        .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn ads(uri: Uri, headers: HeaderMap) -> Response {
    if !uri.path().ends_with("/customers:listAccessibleCustomers") {
        return StatusCode::NOT_FOUND.into_response();
    }
    match bearer(&headers).as_deref() {
        None | Some("expired") => StatusCode::UNAUTHORIZED.into_response(),
        Some(_) => Json(json!({
            "resourceNames": ["customers/1112223333", "customers/4445556666"]
        }))
        .into_response(),
    }
}

pub fn test_config(mock: &MockGoogle) -> Config {
    let mut cfg = Config::default();
    cfg.app_key = APP_KEY.to_string();
    cfg.cron_secret = CRON_SECRET.to_string();
    cfg.insecure_cookie = true;
    cfg.google.client_id = CLIENT_ID.to_string();
    cfg.google.client_secret = CLIENT_SECRET.to_string();
    cfg.google.auth_url = mock.url("auth");
    cfg.google.token_url = mock.url("token");
    cfg.google.userinfo_url = mock.url("userinfo");
    cfg.google.ads_api_url = mock.url("ads/v19/");
    cfg.google.refresh_retries = 0;
    cfg.google.refresh_timeout_secs = 5;
    cfg.sweep.rate_per_minute = 6000;
    cfg.sweep.concurrency = 4;
    cfg
}

pub async fn memory_storage() -> CredentialsStorage {
    CredentialsStorage::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory sqlite")
}

pub fn record(subject: &str, refresh_token: &str, expires_at: DateTime<Utc>) -> CredentialRecord {
    let mut rec = CredentialRecord::new(subject, "google", Utc::now());
    rec.access_token = Some(format!("stale-{subject}"));
    rec.refresh_token = Some(refresh_token.to_string());
    rec.expires_at = expires_at;
    rec
}

pub async fn store_in(
    storage: &CredentialsStorage,
    table: TokenTable,
    record: CredentialRecord,
) -> StoredCredential {
    let stored = StoredCredential {
        table,
        record,
        reauth_required: false,
    };
    storage.save(&stored).await.expect("seed credential");
    stored
}
