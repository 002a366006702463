use crate::config::GOOGLE_PROVIDER;
use crate::error::KeeperError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Canonical provider credential for one `(subject_id, provider)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    pub subject_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(subject_id: impl Into<String>, provider: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.into(),
            provider: provider.into(),
            email: None,
            access_token: None,
            refresh_token: None,
            expires_at: now,
            scope: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once `now + margin` has reached `expires_at`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at <= now + margin
    }

    /// The access token, if present and not yet expired.
    pub fn valid_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        if now >= self.expires_at {
            return None;
        }
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Fold a refresh result into the record.
    pub fn apply_refresh(&mut self, token: &RefreshedToken, now: DateTime<Utc>) {
        self.access_token = Some(token.access_token.clone());
        self.expires_at = token.expires_at(now);
        if let Some(rotated) = token.refresh_token.as_ref().filter(|t| !t.is_empty()) {
            self.refresh_token = Some(rotated.clone());
        }
        if token.scope.is_some() {
            self.scope = token.scope.clone();
        }
        self.updated_at = now;
    }

    /// Build a record from an imported JSON document.
    ///
    /// Accepts `subject_id` (or `user_id`), `provider`, `email`, `refresh_token`,
    /// `access_token`, `expires_at` (or `expiry`, RFC3339) and `scope`.
    pub fn from_payload(payload: &Value, now: DateTime<Utc>) -> Result<Self, KeeperError> {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let subject_id = text("subject_id")
            .or_else(|| text("user_id"))
            .ok_or_else(|| KeeperError::InvalidCredential("missing subject_id".into()))?;
        let refresh_token = text("refresh_token")
            .ok_or_else(|| KeeperError::InvalidCredential("missing refresh_token".into()))?;
        let expires_at = match text("expires_at").or_else(|| text("expiry")) {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| KeeperError::InvalidCredential(format!("bad expiry {raw}: {e}")))?
                .with_timezone(&Utc),
            None => now,
        };

        Ok(Self {
            subject_id,
            provider: text("provider").unwrap_or_else(|| GOOGLE_PROVIDER.to_string()),
            email: text("email"),
            access_token: text("access_token"),
            refresh_token: Some(refresh_token),
            expires_at,
            scope: text("scope"),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Successful answer of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: String,
}

impl RefreshedToken {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in as i64)
    }
}

/// Subset of the Google userinfo document we care about; also the cookie blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoogleUserInfo {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default, alias = "email_verified")]
    pub verified_email: Option<bool>,
}
