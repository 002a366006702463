use crate::api::GoogleAdsApi;
use crate::handlers::cookies::{ACCESS_COOKIE, REFRESH_COOKIE, clear_provider_tokens, store_access_token};
use crate::types::google_ads::{AccessibleAccount, AccountsResponse};
use crate::{KeeperError, router::KeeperState};
use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::PrivateCookieJar;
use chrono::Utc;
use headers::authorization::Bearer;
use headers::{Authorization, HeaderMapExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenSource {
    Cookie,
    Header,
    Refreshed,
}

type Resolved = Result<(String, PrivateCookieJar), (KeeperError, PrivateCookieJar)>;

/// Resolve an access token for this request: cookie, then bearer header, then a refresh
/// through the refresh cookie. The returned jar carries any re-issued access cookie.
async fn resolve_access_token(
    state: &KeeperState,
    headers: &HeaderMap,
    jar: PrivateCookieJar,
) -> Result<(String, TokenSource, PrivateCookieJar), (KeeperError, PrivateCookieJar)> {
    if let Some(cookie) = jar.get(ACCESS_COOKIE).filter(|c| !c.value().is_empty()) {
        return Ok((cookie.value().to_string(), TokenSource::Cookie, jar));
    }
    if let Some(auth) = headers.typed_get::<Authorization<Bearer>>() {
        return Ok((auth.token().to_string(), TokenSource::Header, jar));
    }
    let (token, jar) = refresh_from_cookie(state, jar).await?;
    Ok((token, TokenSource::Refreshed, jar))
}

fn refresh_cookie(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Exchange the refresh cookie and re-issue the access cookie.
async fn refresh_from_cookie(state: &KeeperState, jar: PrivateCookieJar) -> Resolved {
    let Some(refresh_token) = refresh_cookie(&jar) else {
        return Err((KeeperError::ReauthRequired, jar));
    };

    match state.refresh.refresh(refresh_token).await {
        Ok(token) => {
            let now = Utc::now();
            info!("access cookie re-issued from refresh cookie");
            let jar = store_access_token(
                jar,
                &state.cookies,
                &token.access_token,
                token.expires_at(now),
                now,
            );
            Ok((token.access_token, jar))
        }
        Err(e) if e.requires_reauth() => {
            warn!("refresh cookie revoked: {}", e);
            Err((e.into(), clear_provider_tokens(jar, &state.cookies)))
        }
        Err(e) => Err((e.into(), jar)),
    }
}

async fn fetch_accounts(
    state: &KeeperState,
    access_token: &str,
) -> Result<Vec<AccessibleAccount>, KeeperError> {
    GoogleAdsApi::list_accessible_customers(
        state.endpoints.http(),
        &state.config.google.ads_api_url,
        &state.config.google.developer_token,
        access_token,
    )
    .await
}

/// GET /api/google-ads/accounts -> accessible Google Ads customers for the linked user.
pub async fn list_accounts(
    State(state): State<KeeperState>,
    headers: HeaderMap,
    jar: PrivateCookieJar,
) -> Response {
    let (access_token, source, jar) = match resolve_access_token(&state, &headers, jar).await {
        Ok(v) => v,
        Err((err, jar)) => return (jar, err.into_response()).into_response(),
    };

    let (result, jar) = match fetch_accounts(&state, &access_token).await {
        // A stale access token with a live refresh cookie gets one retry.
        Err(KeeperError::ReauthRequired)
            if source != TokenSource::Refreshed && refresh_cookie(&jar).is_some() =>
        {
            info!("Google Ads rejected the presented access token; retrying after refresh");
            match refresh_from_cookie(&state, jar).await {
                Ok((token, jar)) => (fetch_accounts(&state, &token).await, jar),
                Err((err, jar)) => (Err(err), jar),
            }
        }
        other => (other, jar),
    };

    match result {
        Ok(accounts) => (jar, Json(AccountsResponse { accounts })).into_response(),
        Err(err) => (jar, err.into_response()).into_response(),
    }
}
