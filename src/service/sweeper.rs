use crate::config::SweepConfig;
use crate::db::{CredentialsStorage, StoredCredential};
use crate::error::{KeeperError, RefreshError};
use crate::service::refresh_actor::RefreshHandle;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts reported by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub refreshed: usize,
    pub failed: usize,
    pub total_processed: usize,
    /// Subset of `failed` whose refresh token was rejected with `invalid_grant`.
    pub revoked: usize,
    /// The provider rejected the OAuth client itself; every refresh will fail.
    pub misconfigured: bool,
}

#[derive(Debug)]
enum RecordOutcome {
    Refreshed,
    Revoked,
    Misconfigured,
    Failed,
}

/// Credentials whose access token expires within `lookahead` of `now` (inclusive).
pub fn select_due(
    candidates: Vec<StoredCredential>,
    now: DateTime<Utc>,
    lookahead: Duration,
) -> Vec<StoredCredential> {
    candidates
        .into_iter()
        .filter(|c| c.is_refreshable() && c.record.needs_refresh(now, lookahead))
        .collect()
}

/// Periodic bulk refresh of expiring credentials across every token table.
#[derive(Clone)]
pub struct Sweeper {
    storage: CredentialsStorage,
    refresh: RefreshHandle,
    cfg: SweepConfig,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl Sweeper {
    pub fn new(storage: CredentialsStorage, refresh: RefreshHandle, cfg: SweepConfig) -> Self {
        let per_minute = NonZeroU32::new(cfg.rate_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            storage,
            refresh,
            cfg,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    /// Refresh everything due at `now`. Fails only when the candidate listing fails.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary, KeeperError> {
        let candidates = self.storage.list_refreshable().await?;
        let due = select_due(candidates, now, self.cfg.lookahead());
        let total = due.len();
        let concurrency = self.cfg.concurrency.max(1);
        info!(
            due = total,
            concurrency,
            lookahead_secs = self.cfg.lookahead_secs,
            "token sweep started"
        );

        let outcomes: Vec<RecordOutcome> = stream::iter(due)
            .map(|cred| self.refresh_one(cred))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = SweepSummary {
            total_processed: outcomes.len(),
            ..SweepSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                RecordOutcome::Refreshed => summary.refreshed += 1,
                RecordOutcome::Revoked => {
                    summary.failed += 1;
                    summary.revoked += 1;
                }
                RecordOutcome::Misconfigured => {
                    summary.failed += 1;
                    summary.misconfigured = true;
                }
                RecordOutcome::Failed => summary.failed += 1,
            }
        }

        if summary.misconfigured {
            error!(
                failed = summary.failed,
                "token endpoint rejected the OAuth client; every refresh will fail until the client id/secret is fixed"
            );
        }
        info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            revoked = summary.revoked,
            total = summary.total_processed,
            "token sweep finished"
        );
        Ok(summary)
    }

    async fn refresh_one(&self, mut cred: StoredCredential) -> RecordOutcome {
        let subject = cred.record.subject_id.clone();
        let table = cred.table;
        let Some(refresh_token) = cred.record.refresh_token.clone() else {
            return RecordOutcome::Failed;
        };

        self.limiter.until_ready().await;

        let timeout = self.cfg.call_timeout();
        let result = match tokio::time::timeout(timeout, self.refresh.refresh(refresh_token)).await
        {
            Ok(r) => r,
            Err(_) => Err(RefreshError::TimedOut(timeout)),
        };

        match result {
            Ok(token) => {
                cred.record.apply_refresh(&token, Utc::now());
                match self.storage.save(&cred).await {
                    Ok(()) => {
                        debug!(%table, subject = %subject, "credential refreshed");
                        RecordOutcome::Refreshed
                    }
                    Err(e) => {
                        warn!(%table, subject = %subject, "storing refreshed credential failed: {}", e);
                        RecordOutcome::Failed
                    }
                }
            }
            Err(e) if e.requires_reauth() => {
                warn!(%table, subject = %subject, "credential revoked; re-authorization required");
                if let Err(db_err) = self
                    .storage
                    .mark_reauth_required(table, &subject, &cred.record.provider)
                    .await
                {
                    warn!(%table, subject = %subject, "marking credential failed: {}", db_err);
                }
                RecordOutcome::Revoked
            }
            Err(e) if e.is_misconfiguration() => {
                error!(%table, subject = %subject, "refresh failed: {}", e);
                RecordOutcome::Misconfigured
            }
            Err(e) => {
                warn!(%table, subject = %subject, "refresh failed (transient): {}", e);
                RecordOutcome::Failed
            }
        }
    }
}
