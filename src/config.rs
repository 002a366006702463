use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const GOOGLE_PROVIDER: &str = "google";

/// Process-wide configuration. Loaded once in `main` and handed to components explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    pub proxy: Option<Url>,
    /// Shared key the upstream auth gateway presents on internal routes. Empty rejects all.
    pub app_key: String,
    /// Bearer secret for the cron-triggered sweep.
    pub cron_secret: String,
    /// At least 64 bytes; a random key is generated otherwise.
    pub cookie_secret: String,
    pub cookie_domain: Option<String>,
    pub insecure_cookie: bool,
    pub cred_path: Option<PathBuf>,
    pub google: GoogleConfig,
    pub sweep: SweepConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub auth_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
    pub ads_api_url: Url,
    pub developer_token: String,
    pub scopes: Vec<String>,
    pub refresh_timeout_secs: u64,
    pub refresh_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub lookahead_secs: u64,
    pub concurrency: usize,
    pub rate_per_minute: u32,
    pub call_timeout_secs: u64,
    /// Run the sweep in-process on this period, in addition to the cron trigger.
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub always_refresh: bool,
    pub refresh_margin_secs: u64,
}

impl Config {
    /// Defaults, then `config.toml`, then `KEEPER_*` environment variables
    /// (`__` separates nested keys, e.g. `KEEPER_GOOGLE__CLIENT_ID`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("KEEPER_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite://keeper.sqlite".to_string(),
            loglevel: "info".to_string(),
            proxy: None,
            app_key: String::new(),
            cron_secret: String::new(),
            cookie_secret: String::new(),
            cookie_domain: None,
            insecure_cookie: false,
            cred_path: None,
            google: GoogleConfig::default(),
            sweep: SweepConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: static_url("http://localhost:8000/auth/google/callback"),
            auth_url: static_url("https://accounts.google.com/o/oauth2/v2/auth"),
            token_url: static_url("https://oauth2.googleapis.com/token"),
            userinfo_url: static_url("https://www.googleapis.com/oauth2/v2/userinfo"),
            ads_api_url: static_url("https://googleads.googleapis.com/v19/"),
            developer_token: String::new(),
            scopes: vec![
                "openid".to_string(),
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
                "https://www.googleapis.com/auth/adwords".to_string(),
            ],
            refresh_timeout_secs: 15,
            refresh_retries: 2,
        }
    }
}

impl GoogleConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: 45 * 60,
            concurrency: 8,
            rate_per_minute: 120,
            call_timeout_secs: 20,
            interval_secs: None,
        }
    }
}

impl SweepConfig {
    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookahead_secs as i64)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            always_refresh: true,
            refresh_margin_secs: 300,
        }
    }
}

impl BridgeConfig {
    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_margin_secs as i64)
    }
}

fn static_url(s: &str) -> Url {
    Url::parse(s).unwrap_or_else(|e| panic!("invalid built-in url {s}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_a_45_minute_lookahead() {
        let cfg = Config::default();
        assert_eq!(cfg.sweep.lookahead(), chrono::Duration::minutes(45));
        assert!(cfg.bridge.always_refresh);
        assert_eq!(cfg.google.token_url.as_str(), "https://oauth2.googleapis.com/token");
    }
}
