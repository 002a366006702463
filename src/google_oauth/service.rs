use super::endpoints::GoogleOauthEndpoints;
use crate::config::{Config, GoogleConfig};
use crate::error::{KeeperError, RefreshError};
use crate::google_oauth::credentials::RefreshedToken;

use backon::{ExponentialBuilder, Retryable};
use reqwest::redirect::Policy;
use std::time::Duration;
use tracing::{info, warn};

fn default_retry_policy(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(max_times)
        .with_jitter()
}

/// Build the outbound HTTP client shared by every Google call.
pub fn build_http_client(cfg: &Config) -> Result<reqwest::Client, KeeperError> {
    let mut builder = reqwest::Client::builder()
        .user_agent("furriyadh-keeper/0.1")
        // The token endpoint must never be followed through redirects.
        .redirect(Policy::none())
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15));
    if let Some(proxy_url) = cfg.proxy.as_ref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }
    Ok(builder.build()?)
}

/// Exchanges refresh tokens for access tokens.
///
/// Transient failures are retried with backoff inside one call; the whole call is bounded by
/// the configured refresh timeout. Persisting the result is the caller's job.
#[derive(Clone)]
pub struct TokenRefresher {
    endpoints: GoogleOauthEndpoints,
    retry_policy: ExponentialBuilder,
    timeout: Duration,
}

impl TokenRefresher {
    pub fn new(cfg: &GoogleConfig, http: reqwest::Client) -> Self {
        Self {
            endpoints: GoogleOauthEndpoints::new(cfg, http),
            retry_policy: default_retry_policy(cfg.refresh_retries),
            timeout: cfg.refresh_timeout(),
        }
    }

    pub fn endpoints(&self) -> &GoogleOauthEndpoints {
        &self.endpoints
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        if refresh_token.trim().is_empty() {
            return Err(RefreshError::MissingRefreshToken);
        }

        let attempt = (|| async { self.endpoints.exchange_refresh_token(refresh_token).await })
            .retry(self.retry_policy.clone())
            .when(|e: &RefreshError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("Google OAuth2 refresh retrying after {}, sleeping {:?}", err, dur);
            });

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(token)) => {
                info!(expires_in = token.expires_in, "access token refreshed");
                Ok(token)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RefreshError::TimedOut(self.timeout)),
        }
    }
}
