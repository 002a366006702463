use crate::config::GOOGLE_PROVIDER;
use crate::google_oauth::credentials::CredentialRecord;
use crate::handlers::cookies::{CookiePolicy, store_provider_tokens};
use crate::middleware::RequireAppKey;
use crate::service::session_bridge::{FirstPartySession, ProviderTokens};
use crate::{KeeperError, router::KeeperState};
use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar};
use chrono::Utc;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub linked: bool,
    pub email: Option<String>,
    pub expires_at: chrono::DateTime<Utc>,
}

const CSRF_COOKIE: &str = "oauth_csrf_token";
const PKCE_COOKIE: &str = "oauth_pkce_verifier";
const SUBJECT_COOKIE: &str = "oauth_subject";
const FLOW_COOKIE_MAX_AGE: Duration = Duration::minutes(15);

/// GET /auth/google -> redirects the signed-in user to Google's consent page.
pub async fn google_oauth_entry(
    _auth: RequireAppKey,
    State(state): State<KeeperState>,
    session: FirstPartySession,
    jar: PrivateCookieJar,
) -> Response {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token) = state.endpoints.build_authorize_url(challenge);

    let jar = store_flow_cookies(
        jar,
        &state.cookies,
        &csrf_token,
        verifier.secret(),
        &session.subject_id,
    );

    info!(subject = %session.subject_id, "dispatching OAuth redirect");
    (jar, Redirect::temporary(auth_url.as_str())).into_response()
}

/// GET /auth/google/callback -> exchanges the code and stores the new credential.
pub async fn google_oauth_callback(
    State(state): State<KeeperState>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> Response {
    let (flow, jar) = match load_flow_cookies(jar, &state.cookies) {
        Ok(data) => data,
        Err((jar, err)) => return respond_with_error(jar, err),
    };

    if let Some(error) = query.error.as_deref() {
        return respond_with_error(
            jar,
            KeeperError::OauthFlow(format!("consent denied: {error}")),
        );
    }

    let Some(state_param) = query.state.as_deref() else {
        return respond_with_error(
            jar,
            KeeperError::OauthFlow("missing `state` in callback".to_string()),
        );
    };
    if !bool::from(state_param.as_bytes().ct_eq(flow.csrf.as_bytes())) {
        return respond_with_error(jar, KeeperError::OauthFlow("CSRF token mismatch".to_string()));
    }

    let Some(code) = query.code.as_deref() else {
        return respond_with_error(
            jar,
            KeeperError::OauthFlow("missing `code` in callback".to_string()),
        );
    };

    match link_credential(&state, &flow.subject, code, flow.pkce_verifier).await {
        Ok((tokens, body)) => {
            let jar = store_provider_tokens(jar, &state.cookies, &tokens, Utc::now());
            info!(subject = %flow.subject, "OAuth callback stored credential");
            (jar, Json(body)).into_response()
        }
        Err(err) => respond_with_error(jar, err),
    }
}

async fn link_credential(
    state: &KeeperState,
    subject: &str,
    code: &str,
    pkce_verifier: String,
) -> Result<(ProviderTokens, CallbackResponse), KeeperError> {
    let (token, id_token_email) = state
        .endpoints
        .exchange_authorization_code(
            AuthorizationCode::new(code.to_owned()),
            PkceCodeVerifier::new(pkce_verifier),
        )
        .await?;
    let now = Utc::now();

    if token.refresh_token.is_none() {
        let has_stored = state
            .storage
            .get(subject, GOOGLE_PROVIDER)
            .await?
            .is_some_and(|s| s.record.has_refresh_token());
        if !has_stored {
            return Err(KeeperError::OauthFlow(
                "OAuth response missing refresh_token; ensure access_type=offline and prompt=consent are allowed for this client/user".to_string(),
            ));
        }
    }

    let user_info = match state.endpoints.fetch_userinfo(&token.access_token).await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(subject, "userinfo fetch after code exchange failed: {}", e);
            None
        }
    };

    let mut record = CredentialRecord::new(subject, GOOGLE_PROVIDER, now);
    record.email = user_info
        .as_ref()
        .and_then(|u| u.email.clone())
        .or(id_token_email);
    record.apply_refresh(&token, now);
    state.storage.upsert(&record).await?;

    let tokens = ProviderTokens {
        access_token: Some(token.access_token.clone()),
        access_expires_at: Some(record.expires_at),
        refresh_token: token.refresh_token.clone(),
        user_info,
    };
    let body = CallbackResponse {
        linked: true,
        email: record.email.clone(),
        expires_at: record.expires_at,
    };
    Ok((tokens, body))
}

struct FlowCookies {
    csrf: String,
    pkce_verifier: String,
    subject: String,
}

fn store_flow_cookies(
    jar: PrivateCookieJar,
    policy: &CookiePolicy,
    csrf: &CsrfToken,
    pkce_verifier: &str,
    subject: &str,
) -> PrivateCookieJar {
    jar.add(policy.build(CSRF_COOKIE, csrf.secret().to_string(), FLOW_COOKIE_MAX_AGE))
        .add(policy.build(PKCE_COOKIE, pkce_verifier.to_string(), FLOW_COOKIE_MAX_AGE))
        .add(policy.build(SUBJECT_COOKIE, subject.to_string(), FLOW_COOKIE_MAX_AGE))
}

fn load_flow_cookies(
    jar: PrivateCookieJar,
    policy: &CookiePolicy,
) -> Result<(FlowCookies, PrivateCookieJar), (PrivateCookieJar, KeeperError)> {
    let value = |name: &str| jar.get(name).map(|c: Cookie<'static>| c.value().to_owned());
    let (csrf, pkce_verifier, subject) = (value(CSRF_COOKIE), value(PKCE_COOKIE), value(SUBJECT_COOKIE));
    let jar = clear_flow_cookies(jar, policy);

    let Some(csrf) = csrf else {
        return Err((jar, KeeperError::OauthFlow("Missing CSRF token in cookie".to_string())));
    };
    let Some(pkce_verifier) = pkce_verifier else {
        return Err((
            jar,
            KeeperError::OauthFlow("Missing PKCE verifier in cookie".to_string()),
        ));
    };
    let Some(subject) = subject else {
        return Err((jar, KeeperError::OauthFlow("Missing subject in cookie".to_string())));
    };

    Ok((
        FlowCookies {
            csrf,
            pkce_verifier,
            subject,
        },
        jar,
    ))
}

fn clear_flow_cookies(jar: PrivateCookieJar, policy: &CookiePolicy) -> PrivateCookieJar {
    jar.remove(policy.removal(CSRF_COOKIE))
        .remove(policy.removal(PKCE_COOKIE))
        .remove(policy.removal(SUBJECT_COOKIE))
}

fn respond_with_error(jar: PrivateCookieJar, err: KeeperError) -> Response {
    warn!("OAuth callback failed: {}", err);
    (jar, err.into_response()).into_response()
}
