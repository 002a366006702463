use crate::handlers::cookies::{clear_provider_tokens, store_provider_tokens};
use crate::middleware::RequireAppKey;
use crate::router::KeeperState;
use crate::service::session_bridge::{BridgeOutcome, FirstPartySession, MatchedBy};
use axum::{Json, extract::State, response::IntoResponse};
use axum_extra::extract::cookie::PrivateCookieJar;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SessionSyncResponse {
    pub linked: bool,
    pub matched_by: Option<MatchedBy>,
    pub refreshed: bool,
    pub reauth_required: bool,
}

/// POST /api/auth/session-sync -> restore stored Google tokens into the cookie bundle.
///
/// Always answers 200: the first-party session stays valid whatever happens here.
pub async fn session_sync(
    _auth: RequireAppKey,
    State(state): State<KeeperState>,
    session: FirstPartySession,
    jar: PrivateCookieJar,
) -> impl IntoResponse {
    let now = Utc::now();
    let outcome = state.bridge.sync(&session, now).await;

    let (jar, body) = match outcome {
        BridgeOutcome::NotLinked => (
            jar,
            SessionSyncResponse {
                linked: false,
                matched_by: None,
                refreshed: false,
                reauth_required: false,
            },
        ),
        BridgeOutcome::Restored {
            tokens,
            matched_by,
            refreshed,
        } => (
            store_provider_tokens(jar, &state.cookies, &tokens, now),
            SessionSyncResponse {
                linked: true,
                matched_by: Some(matched_by),
                refreshed,
                reauth_required: false,
            },
        ),
        BridgeOutcome::ReauthRequired { matched_by } => (
            clear_provider_tokens(jar, &state.cookies),
            SessionSyncResponse {
                linked: true,
                matched_by: Some(matched_by),
                refreshed: false,
                reauth_required: true,
            },
        ),
    };

    (jar, Json(body))
}
