use crate::config::{BridgeConfig, GOOGLE_PROVIDER};
use crate::db::{CredentialsStorage, StoredCredential};
use crate::error::KeeperError;
use crate::google_oauth::credentials::{CredentialRecord, GoogleUserInfo};
use crate::google_oauth::endpoints::GoogleOauthEndpoints;
use crate::service::refresh_actor::RefreshHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Identity issued by the first-party auth system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstPartySession {
    pub subject_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    SubjectId,
    Email,
}

/// Result of looking up a session's stored credential.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialLookup {
    ById(StoredCredential),
    ByEmail(StoredCredential),
    NotFound,
}

/// Provider tokens to place into the cookie bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTokens {
    pub access_token: Option<String>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub user_info: Option<GoogleUserInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutcome {
    /// The subject never authorized the provider.
    NotLinked,
    Restored {
        tokens: ProviderTokens,
        matched_by: MatchedBy,
        refreshed: bool,
    },
    /// A record exists but only new end-user consent can revive it.
    ReauthRequired { matched_by: MatchedBy },
}

/// Restores stored provider tokens for a freshly authenticated first-party session.
#[derive(Clone)]
pub struct SessionBridge {
    storage: CredentialsStorage,
    refresh: RefreshHandle,
    endpoints: GoogleOauthEndpoints,
    cfg: BridgeConfig,
}

impl SessionBridge {
    pub fn new(
        storage: CredentialsStorage,
        refresh: RefreshHandle,
        endpoints: GoogleOauthEndpoints,
        cfg: BridgeConfig,
    ) -> Self {
        Self {
            storage,
            refresh,
            endpoints,
            cfg,
        }
    }

    /// Find the session's credential by subject id, falling back to email.
    pub async fn lookup(&self, session: &FirstPartySession) -> Result<CredentialLookup, KeeperError> {
        if let Some(found) = self
            .storage
            .find_by_subject(&session.subject_id, GOOGLE_PROVIDER)
            .await?
        {
            return Ok(CredentialLookup::ById(found));
        }
        let Some(email) = session.email.as_deref().filter(|e| !e.is_empty()) else {
            return Ok(CredentialLookup::NotFound);
        };
        Ok(match self.storage.find_by_email(email, GOOGLE_PROVIDER).await? {
            Some(found) => CredentialLookup::ByEmail(found),
            None => CredentialLookup::NotFound,
        })
    }

    /// Never fails: provider trouble must not break the first-party login.
    pub async fn sync(&self, session: &FirstPartySession, now: DateTime<Utc>) -> BridgeOutcome {
        let lookup = match self.lookup(session).await {
            Ok(l) => l,
            Err(e) => {
                warn!(subject = %session.subject_id, "credential lookup failed: {}", e);
                return BridgeOutcome::NotLinked;
            }
        };

        let (mut stored, matched_by) = match lookup {
            CredentialLookup::ById(s) => (s, MatchedBy::SubjectId),
            CredentialLookup::ByEmail(s) => (s, MatchedBy::Email),
            CredentialLookup::NotFound => {
                debug!(subject = %session.subject_id, "no stored provider credential");
                return BridgeOutcome::NotLinked;
            }
        };

        if !stored.is_refreshable() {
            info!(subject = %session.subject_id, table = %stored.table, "stored credential needs re-authorization");
            return BridgeOutcome::ReauthRequired { matched_by };
        }

        let must_refresh =
            self.cfg.always_refresh || stored.record.needs_refresh(now, self.cfg.refresh_margin());
        if !must_refresh {
            return BridgeOutcome::Restored {
                tokens: tokens_from(&stored.record, now, None),
                matched_by,
                refreshed: false,
            };
        }

        let refresh_token = stored.record.refresh_token.clone().unwrap_or_default();
        match self.refresh.refresh(refresh_token).await {
            Ok(token) => {
                stored.record.apply_refresh(&token, now);
                self.persist(session, &stored, matched_by, now).await;
                let user_info = match self.endpoints.fetch_userinfo(&token.access_token).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        debug!(subject = %session.subject_id, "userinfo unavailable: {}", e);
                        None
                    }
                };
                info!(subject = %session.subject_id, ?matched_by, "provider tokens restored");
                BridgeOutcome::Restored {
                    tokens: tokens_from(&stored.record, now, user_info),
                    matched_by,
                    refreshed: true,
                }
            }
            Err(e) if e.requires_reauth() => {
                warn!(subject = %session.subject_id, "stored refresh token revoked: {}", e);
                if let Err(db_err) = self
                    .storage
                    .mark_reauth_required(stored.table, &stored.record.subject_id, &stored.record.provider)
                    .await
                {
                    warn!(subject = %session.subject_id, "marking credential failed: {}", db_err);
                }
                BridgeOutcome::ReauthRequired { matched_by }
            }
            Err(e) => {
                warn!(subject = %session.subject_id, "refresh during session sync failed: {}", e);
                BridgeOutcome::Restored {
                    tokens: tokens_from(&stored.record, now, None),
                    matched_by,
                    refreshed: false,
                }
            }
        }
    }

    async fn persist(
        &self,
        session: &FirstPartySession,
        stored: &StoredCredential,
        matched_by: MatchedBy,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.storage.save(stored).await {
            warn!(subject = %session.subject_id, table = %stored.table, "storing refreshed credential failed: {}", e);
        }
        // An email match belongs to another subject id; link it to this session's subject.
        if matched_by != MatchedBy::Email {
            return;
        }
        let linked = CredentialRecord {
            subject_id: session.subject_id.clone(),
            email: session.email.clone(),
            created_at: now,
            updated_at: now,
            ..stored.record.clone()
        };
        match self.storage.upsert(&linked).await {
            Ok(_) => info!(subject = %session.subject_id, from = %stored.record.subject_id, "credential linked to session subject"),
            Err(e) => warn!(subject = %session.subject_id, "linking credential failed: {}", e),
        }
    }
}

fn tokens_from(
    record: &CredentialRecord,
    now: DateTime<Utc>,
    user_info: Option<GoogleUserInfo>,
) -> ProviderTokens {
    let access_token = record.valid_access_token(now).map(str::to_string);
    ProviderTokens {
        access_expires_at: access_token.as_ref().map(|_| record.expires_at),
        access_token,
        refresh_token: record.refresh_token.clone(),
        user_info,
    }
}
