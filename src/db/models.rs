//! Row shapes of the three token tables and their mapping to [`CredentialRecord`].

use crate::config::GOOGLE_PROVIDER;
use crate::google_oauth::credentials::CredentialRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Physical table a credential lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTable {
    OauthTokens,
    UserOauthTokens,
    GoogleAdsCredentials,
}

impl TokenTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenTable::OauthTokens => "oauth_tokens",
            TokenTable::UserOauthTokens => "user_oauth_tokens",
            TokenTable::GoogleAdsCredentials => "google_ads_credentials",
        }
    }
}

impl fmt::Display for TokenTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical record tagged with where it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub table: TokenTable,
    pub record: CredentialRecord,
    pub reauth_required: bool,
}

impl StoredCredential {
    pub fn is_refreshable(&self) -> bool {
        !self.reauth_required && self.record.has_refresh_token()
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DbOauthToken {
    pub id: i64,
    pub user_id: String,
    pub provider: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub needs_reauth: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbOauthToken> for StoredCredential {
    fn from(d: DbOauthToken) -> Self {
        Self {
            table: TokenTable::OauthTokens,
            reauth_required: d.needs_reauth,
            record: CredentialRecord {
                subject_id: d.user_id,
                provider: d.provider,
                email: None,
                access_token: d.access_token,
                refresh_token: d.refresh_token,
                expires_at: d.expires_at,
                scope: d.scope,
                created_at: d.created_at,
                updated_at: d.updated_at,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DbUserOauthToken {
    pub id: i64,
    pub user_id: String,
    pub email: Option<String>,
    pub provider: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUserOauthToken> for StoredCredential {
    fn from(d: DbUserOauthToken) -> Self {
        Self {
            table: TokenTable::UserOauthTokens,
            reauth_required: !d.is_active,
            record: CredentialRecord {
                subject_id: d.user_id,
                provider: d.provider,
                email: d.email,
                access_token: d.access_token,
                refresh_token: d.refresh_token,
                expires_at: d.token_expires_at,
                scope: d.scope,
                created_at: d.created_at,
                updated_at: d.updated_at,
            },
        }
    }
}

pub const ADS_STATUS_ACTIVE: &str = "active";
pub const ADS_STATUS_REAUTH: &str = "reauth_required";

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DbGoogleAdsCredential {
    pub id: i64,
    pub customer_id: String,
    pub manager_email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbGoogleAdsCredential> for StoredCredential {
    fn from(d: DbGoogleAdsCredential) -> Self {
        // Out-of-range epochs are treated as already expired.
        let expires_at = DateTime::from_timestamp(d.token_expiry, 0).unwrap_or(DateTime::UNIX_EPOCH);
        Self {
            table: TokenTable::GoogleAdsCredentials,
            reauth_required: d.status == ADS_STATUS_REAUTH,
            record: CredentialRecord {
                subject_id: d.customer_id,
                provider: GOOGLE_PROVIDER.to_string(),
                email: d.manager_email,
                access_token: d.access_token,
                refresh_token: d.refresh_token,
                expires_at,
                scope: None,
                created_at: d.created_at,
                updated_at: d.updated_at,
            },
        }
    }
}
