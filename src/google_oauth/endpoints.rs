use crate::config::GoogleConfig;
use crate::error::{KeeperError, RefreshError};
use crate::google_oauth::credentials::{DEFAULT_EXPIRES_IN_SECS, GoogleUserInfo, RefreshedToken};

use base64::Engine;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret,
    CsrfToken, EndpointNotSet, EndpointSet, ExtraTokenFields, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Google OAuth endpoints bound to one client registration.
#[derive(Clone)]
pub struct GoogleOauthEndpoints {
    client: GoogleOauth2Client,
    http: reqwest::Client,
    userinfo_url: Url,
    scopes: Vec<String>,
}

impl GoogleOauthEndpoints {
    pub fn new(cfg: &GoogleConfig, http: reqwest::Client) -> Self {
        Self {
            client: build_oauth2_client(cfg),
            http,
            userinfo_url: cfg.userinfo_url.clone(),
            scopes: cfg.scopes.clone(),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange a refresh token at the token endpoint. No retries here.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, RefreshError> {
        let resp: GoogleTokenResponse = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await?;
        debug!("token endpoint accepted refresh token");
        Ok(to_refreshed(&resp))
    }

    /// Consent-screen URL with PKCE and offline access so Google issues a refresh token.
    pub fn build_authorize_url(&self, challenge: PkceCodeChallenge) -> (Url, CsrfToken) {
        self.client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url()
    }

    pub async fn exchange_authorization_code(
        &self,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
    ) -> Result<(RefreshedToken, Option<String>), KeeperError> {
        let resp: GoogleTokenResponse = self
            .client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await?;
        let email = resp
            .extra_fields()
            .id_token
            .as_deref()
            .and_then(email_from_id_token);
        Ok((to_refreshed(&resp), email))
    }

    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<GoogleUserInfo, KeeperError> {
        let info = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<GoogleUserInfo>()
            .await?;
        debug!(user = %info.id, "fetched userinfo");
        Ok(info)
    }
}

fn to_refreshed(resp: &GoogleTokenResponse) -> RefreshedToken {
    RefreshedToken {
        access_token: resp.access_token().secret().clone(),
        expires_in: resp
            .expires_in()
            .map(|d| d.as_secs())
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        refresh_token: resp.refresh_token().map(|t| t.secret().clone()),
        scope: resp.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
        token_type: match resp.token_type() {
            BasicTokenType::Bearer => "Bearer".to_string(),
            BasicTokenType::Mac => "MAC".to_string(),
            BasicTokenType::Extension(other) => other.clone(),
        },
    }
}

/// Pull the `email` claim out of an (unverified) id_token payload.
pub fn email_from_id_token(id_token: &str) -> Option<String> {
    let payload_b64 = id_token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .ok()?;
    let payload: Value = serde_json::from_slice(&decoded).ok()?;
    payload.get("email")?.as_str().map(str::to_string)
}

fn build_oauth2_client(cfg: &GoogleConfig) -> GoogleOauth2Client {
    OAuth2Client::new(ClientId::new(cfg.client_id.clone()))
        .set_client_secret(ClientSecret::new(cfg.client_secret.clone()))
        .set_auth_type(AuthType::RequestBody)
        .set_auth_uri(AuthUrl::from_url(cfg.auth_url.clone()))
        .set_token_uri(TokenUrl::from_url(cfg.token_url.clone()))
        .set_redirect_uri(RedirectUrl::from_url(cfg.redirect_uri.clone()))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoogleTokenField {
    #[serde(rename = "id_token")]
    pub id_token: Option<String>,
}
impl ExtraTokenFields for GoogleTokenField {}

pub type GoogleTokenResponse = StandardTokenResponse<GoogleTokenField, BasicTokenType>;

pub type GoogleOauth2Client = OAuth2Client<
    BasicErrorResponse,
    GoogleTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;
