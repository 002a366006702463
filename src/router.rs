use crate::config::Config;
use crate::db::CredentialsStorage;
use crate::error::KeeperError;
use crate::google_oauth::endpoints::GoogleOauthEndpoints;
use crate::google_oauth::service::{TokenRefresher, build_http_client};
use crate::handlers::cookies::CookiePolicy;
use crate::handlers::{cron, google_ads, google_oauth, session_sync};
use crate::service::refresh_actor::{self, RefreshHandle};
use crate::service::{SessionBridge, Sweeper};

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::Key;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Shared state for every route.
#[derive(Clone)]
pub struct KeeperState {
    pub config: Arc<Config>,
    pub storage: CredentialsStorage,
    pub refresh: RefreshHandle,
    pub endpoints: GoogleOauthEndpoints,
    pub bridge: SessionBridge,
    pub sweeper: Sweeper,
    pub cookies: CookiePolicy,
    cookie_key: Key,
}

impl KeeperState {
    /// Wire every component from configuration and an opened store.
    pub async fn new(config: Config, storage: CredentialsStorage) -> Result<Self, KeeperError> {
        let http = build_http_client(&config)?;
        let refresher = TokenRefresher::new(&config.google, http);
        let endpoints = refresher.endpoints().clone();
        let refresh = refresh_actor::spawn(refresher).await?;

        let bridge = SessionBridge::new(
            storage.clone(),
            refresh.clone(),
            endpoints.clone(),
            config.bridge.clone(),
        );
        let sweeper = Sweeper::new(storage.clone(), refresh.clone(), config.sweep.clone());

        let cookie_key = match Key::try_from(config.cookie_secret.as_bytes()) {
            Ok(key) => key,
            Err(_) => {
                warn!("cookie_secret shorter than 64 bytes; using a random key, cookies will not survive restarts");
                Key::generate()
            }
        };

        Ok(Self {
            cookies: CookiePolicy::from_config(&config),
            config: Arc::new(config),
            storage,
            refresh,
            endpoints,
            bridge,
            sweeper,
            cookie_key,
        })
    }
}

impl FromRef<KeeperState> for Key {
    fn from_ref(state: &KeeperState) -> Self {
        state.cookie_key.clone()
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub fn keeper_router(state: KeeperState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/cron/refresh-tokens", get(cron::refresh_tokens))
        .route("/api/auth/session-sync", post(session_sync::session_sync))
        .route("/auth/google", get(google_oauth::google_oauth_entry))
        .route("/auth/google/callback", get(google_oauth::google_oauth_callback))
        .route("/api/google-ads/accounts", get(google_ads::list_accounts))
        .with_state(state)
}
