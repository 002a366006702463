use crate::config::Config;
use crate::service::session_bridge::ProviderTokens;
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::{DateTime, Utc};
use time::Duration;
use tracing::warn;

pub const ACCESS_COOKIE: &str = "google_access_token";
pub const REFRESH_COOKIE: &str = "google_refresh_token";
pub const USER_INFO_COOKIE: &str = "google_user_info";

const ACCESS_MAX_AGE_SECS: i64 = 60 * 60;
const LONG_MAX_AGE: Duration = Duration::days(30);

/// Attributes shared by every cookie this service sets.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub domain: Option<String>,
    pub secure: bool,
}

impl CookiePolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            domain: cfg.cookie_domain.clone().filter(|d| !d.is_empty()),
            secure: !cfg.insecure_cookie,
        }
    }

    pub fn build(&self, name: &str, value: String, max_age: Duration) -> Cookie<'static> {
        let mut builder = Cookie::build(Cookie::new(name.to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age);
        if let Some(domain) = self.domain.clone() {
            builder = builder.domain(domain);
        }
        builder.build()
    }

    pub fn removal(&self, name: &str) -> Cookie<'static> {
        let mut builder = Cookie::build(Cookie::new(name.to_string(), "")).path("/");
        if let Some(domain) = self.domain.clone() {
            builder = builder.domain(domain);
        }
        builder.build()
    }
}

/// Access cookie lifetime: what is left of the token, capped at one hour.
pub fn access_max_age(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let remaining = (expires_at - now).num_seconds().clamp(0, ACCESS_MAX_AGE_SECS);
    Duration::seconds(remaining)
}

pub fn store_access_token(
    jar: PrivateCookieJar,
    policy: &CookiePolicy,
    access_token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> PrivateCookieJar {
    jar.add(policy.build(
        ACCESS_COOKIE,
        access_token.to_string(),
        access_max_age(expires_at, now),
    ))
}

/// Write the cookie bundle for whatever tokens are present.
pub fn store_provider_tokens(
    mut jar: PrivateCookieJar,
    policy: &CookiePolicy,
    tokens: &ProviderTokens,
    now: DateTime<Utc>,
) -> PrivateCookieJar {
    if let (Some(access), Some(expires_at)) = (&tokens.access_token, tokens.access_expires_at) {
        jar = store_access_token(jar, policy, access, expires_at, now);
    }
    if let Some(refresh) = &tokens.refresh_token {
        jar = jar.add(policy.build(REFRESH_COOKIE, refresh.clone(), LONG_MAX_AGE));
    }
    if let Some(info) = &tokens.user_info {
        match serde_json::to_string(info) {
            Ok(blob) => jar = jar.add(policy.build(USER_INFO_COOKIE, blob, LONG_MAX_AGE)),
            Err(e) => warn!("serializing user info cookie failed: {}", e),
        }
    }
    jar
}

pub fn clear_provider_tokens(jar: PrivateCookieJar, policy: &CookiePolicy) -> PrivateCookieJar {
    jar.remove(policy.removal(ACCESS_COOKIE))
        .remove(policy.removal(REFRESH_COOKIE))
        .remove(policy.removal(USER_INFO_COOKIE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_cookie_lifetime_tracks_token_expiry() {
        let now = Utc::now();
        assert_eq!(
            access_max_age(now + chrono::Duration::minutes(10), now),
            Duration::minutes(10)
        );
        assert_eq!(
            access_max_age(now + chrono::Duration::hours(5), now),
            Duration::hours(1)
        );
        assert_eq!(access_max_age(now - chrono::Duration::minutes(1), now), Duration::ZERO);
    }

    #[test]
    fn cookies_follow_policy() {
        let policy = CookiePolicy {
            domain: Some(".furriyadh.com".into()),
            secure: true,
        };
        let cookie = policy.build(REFRESH_COOKIE, "rt".into(), LONG_MAX_AGE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.domain(), Some("furriyadh.com"));
        assert_eq!(cookie.path(), Some("/"));
    }
}
