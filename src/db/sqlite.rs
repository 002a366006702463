use crate::db::models::{
    ADS_STATUS_ACTIVE, ADS_STATUS_REAUTH, DbGoogleAdsCredential, DbOauthToken, DbUserOauthToken,
    StoredCredential, TokenTable,
};
use crate::db::schema::SQLITE_INIT;
use crate::error::KeeperError;
use crate::google_oauth::credentials::CredentialRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

const OAUTH_TOKENS_COLUMNS: &str = "id, user_id, provider, access_token, refresh_token, \
     expires_at, scope, needs_reauth, created_at, updated_at";
const USER_OAUTH_TOKENS_COLUMNS: &str = "id, user_id, email, provider, access_token, \
     refresh_token, token_expires_at, token_type, scope, is_active, created_at, updated_at";
const ADS_COLUMNS: &str = "id, customer_id, manager_email, access_token, refresh_token, \
     token_expiry, status, created_at, updated_at";

/// Token Store over the three token tables.
#[derive(Clone)]
pub struct CredentialsStorage {
    pool: SqlitePool,
}

impl CredentialsStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating the file if needed) and initialize the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, KeeperError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(connect_opts)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), KeeperError> {
        // sqlx::query runs one statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Canonical lookup by unique key.
    pub async fn get(
        &self,
        subject_id: &str,
        provider: &str,
    ) -> Result<Option<StoredCredential>, KeeperError> {
        let sql = format!(
            "SELECT {OAUTH_TOKENS_COLUMNS} FROM oauth_tokens WHERE user_id = ? AND provider = ?"
        );
        let row: Option<DbOauthToken> = sqlx::query_as(&sql)
            .bind(subject_id)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Upsert into the canonical table by `(user_id, provider)`. Returns the row id.
    ///
    /// A missing refresh token never erases a stored one, and `created_at` survives updates.
    pub async fn upsert(&self, rec: &CredentialRecord) -> Result<i64, KeeperError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO oauth_tokens (
                user_id, provider, access_token, refresh_token, expires_at, scope,
                needs_reauth, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token=excluded.access_token,
                refresh_token=COALESCE(excluded.refresh_token, oauth_tokens.refresh_token),
                expires_at=excluded.expires_at,
                scope=COALESCE(excluded.scope, oauth_tokens.scope),
                needs_reauth=CASE WHEN excluded.refresh_token IS NULL
                    THEN oauth_tokens.needs_reauth ELSE 0 END,
                updated_at=excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&rec.subject_id)
        .bind(&rec.provider)
        .bind(&rec.access_token)
        .bind(&rec.refresh_token)
        .bind(rec.expires_at)
        .bind(&rec.scope)
        .bind(rec.created_at)
        .bind(rec.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Write a credential back to the table it came from.
    pub async fn save(&self, stored: &StoredCredential) -> Result<(), KeeperError> {
        let rec = &stored.record;
        match stored.table {
            TokenTable::OauthTokens => {
                self.upsert(rec).await?;
            }
            TokenTable::UserOauthTokens => {
                sqlx::query(
                    r#"
                    INSERT INTO user_oauth_tokens (
                        user_id, email, provider, access_token, refresh_token,
                        token_expires_at, token_type, scope, is_active, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, 'Bearer', ?, 1, ?, ?)
                    ON CONFLICT(user_id, provider) DO UPDATE SET
                        email=COALESCE(excluded.email, user_oauth_tokens.email),
                        access_token=excluded.access_token,
                        refresh_token=COALESCE(excluded.refresh_token, user_oauth_tokens.refresh_token),
                        token_expires_at=excluded.token_expires_at,
                        scope=COALESCE(excluded.scope, user_oauth_tokens.scope),
                        is_active=1,
                        updated_at=excluded.updated_at
                    "#,
                )
                .bind(&rec.subject_id)
                .bind(&rec.email)
                .bind(&rec.provider)
                .bind(&rec.access_token)
                .bind(&rec.refresh_token)
                .bind(rec.expires_at)
                .bind(&rec.scope)
                .bind(rec.created_at)
                .bind(rec.updated_at)
                .execute(&self.pool)
                .await?;
            }
            TokenTable::GoogleAdsCredentials => {
                sqlx::query(
                    r#"
                    INSERT INTO google_ads_credentials (
                        customer_id, manager_email, access_token, refresh_token,
                        token_expiry, status, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(customer_id) DO UPDATE SET
                        manager_email=COALESCE(excluded.manager_email, google_ads_credentials.manager_email),
                        access_token=excluded.access_token,
                        refresh_token=COALESCE(excluded.refresh_token, google_ads_credentials.refresh_token),
                        token_expiry=excluded.token_expiry,
                        status=excluded.status,
                        updated_at=excluded.updated_at
                    "#,
                )
                .bind(&rec.subject_id)
                .bind(&rec.email)
                .bind(&rec.access_token)
                .bind(&rec.refresh_token)
                .bind(rec.expires_at.timestamp())
                .bind(ADS_STATUS_ACTIVE)
                .bind(rec.created_at)
                .bind(rec.updated_at)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Look a subject up in every table, canonical first.
    pub async fn find_by_subject(
        &self,
        subject_id: &str,
        provider: &str,
    ) -> Result<Option<StoredCredential>, KeeperError> {
        if let Some(found) = self.get(subject_id, provider).await? {
            return Ok(Some(found));
        }

        let sql = format!(
            "SELECT {USER_OAUTH_TOKENS_COLUMNS} FROM user_oauth_tokens \
             WHERE user_id = ? AND provider = ?"
        );
        let row: Option<DbUserOauthToken> = sqlx::query_as(&sql)
            .bind(subject_id)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(row.into()));
        }

        if !is_google(provider) {
            return Ok(None);
        }
        let sql = format!("SELECT {ADS_COLUMNS} FROM google_ads_credentials WHERE customer_id = ?");
        let row: Option<DbGoogleAdsCredential> = sqlx::query_as(&sql)
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Email lookup across the tables that carry an email column; newest row wins.
    pub async fn find_by_email(
        &self,
        email: &str,
        provider: &str,
    ) -> Result<Option<StoredCredential>, KeeperError> {
        let sql = format!(
            "SELECT {USER_OAUTH_TOKENS_COLUMNS} FROM user_oauth_tokens \
             WHERE lower(email) = lower(?) AND provider = ? ORDER BY updated_at DESC LIMIT 1"
        );
        let row: Option<DbUserOauthToken> = sqlx::query_as(&sql)
            .bind(email)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(row.into()));
        }

        if !is_google(provider) {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {ADS_COLUMNS} FROM google_ads_credentials \
             WHERE lower(manager_email) = lower(?) ORDER BY updated_at DESC LIMIT 1"
        );
        let row: Option<DbGoogleAdsCredential> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Every credential, from every table, that a refresh could still revive.
    pub async fn list_refreshable(&self) -> Result<Vec<StoredCredential>, KeeperError> {
        let mut out = Vec::new();

        let sql = format!(
            "SELECT {OAUTH_TOKENS_COLUMNS} FROM oauth_tokens \
             WHERE needs_reauth = 0 AND refresh_token IS NOT NULL AND refresh_token != '' ORDER BY id"
        );
        let rows: Vec<DbOauthToken> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        out.extend(rows.into_iter().map(StoredCredential::from));

        let sql = format!(
            "SELECT {USER_OAUTH_TOKENS_COLUMNS} FROM user_oauth_tokens \
             WHERE is_active = 1 AND refresh_token IS NOT NULL AND refresh_token != '' ORDER BY id"
        );
        let rows: Vec<DbUserOauthToken> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        out.extend(rows.into_iter().map(StoredCredential::from));

        let sql = format!(
            "SELECT {ADS_COLUMNS} FROM google_ads_credentials \
             WHERE status = ? AND refresh_token IS NOT NULL AND refresh_token != '' ORDER BY id"
        );
        let rows: Vec<DbGoogleAdsCredential> = sqlx::query_as(&sql)
            .bind(ADS_STATUS_ACTIVE)
            .fetch_all(&self.pool)
            .await?;
        out.extend(rows.into_iter().map(StoredCredential::from));

        Ok(out)
    }

    /// Record that the provider rejected this credential's refresh token.
    pub async fn mark_reauth_required(
        &self,
        table: TokenTable,
        subject_id: &str,
        provider: &str,
    ) -> Result<(), KeeperError> {
        let now = chrono::Utc::now();
        let query = match table {
            TokenTable::OauthTokens => sqlx::query(
                "UPDATE oauth_tokens SET needs_reauth = 1, updated_at = ? \
                 WHERE user_id = ? AND provider = ?",
            )
            .bind(now)
            .bind(subject_id)
            .bind(provider),
            TokenTable::UserOauthTokens => sqlx::query(
                "UPDATE user_oauth_tokens SET is_active = 0, updated_at = ? \
                 WHERE user_id = ? AND provider = ?",
            )
            .bind(now)
            .bind(subject_id)
            .bind(provider),
            TokenTable::GoogleAdsCredentials => sqlx::query(
                "UPDATE google_ads_credentials SET status = ?, updated_at = ? \
                 WHERE customer_id = ?",
            )
            .bind(ADS_STATUS_REAUTH)
            .bind(now)
            .bind(subject_id),
        };
        query.execute(&self.pool).await?;
        Ok(())
    }
}

fn is_google(provider: &str) -> bool {
    provider.eq_ignore_ascii_case(crate::config::GOOGLE_PROVIDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn memory_storage() -> CredentialsStorage {
        CredentialsStorage::connect("sqlite::memory:", 1)
            .await
            .expect("in-memory sqlite")
    }

    fn record(subject: &str, access: &str, refresh: Option<&str>) -> CredentialRecord {
        let now = Utc::now();
        let mut rec = CredentialRecord::new(subject, "google", now);
        rec.access_token = Some(access.to_string());
        rec.refresh_token = refresh.map(str::to_string);
        rec.expires_at = now + Duration::hours(1);
        rec
    }

    async fn count(storage: &CredentialsStorage, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(storage.pool())
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row_with_latest_values() {
        let storage = memory_storage().await;
        let first = storage.upsert(&record("u1", "at-1", Some("rt"))).await.unwrap();
        let second = storage.upsert(&record("u1", "at-2", Some("rt"))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(count(&storage, "oauth_tokens").await, 1);
        let stored = storage.get("u1", "google").await.unwrap().unwrap();
        assert_eq!(stored.record.access_token.as_deref(), Some("at-2"));
        assert_eq!(stored.table, TokenTable::OauthTokens);
    }

    #[tokio::test]
    async fn upsert_without_refresh_token_keeps_the_stored_one() {
        let storage = memory_storage().await;
        let original = record("u1", "at-1", Some("rt-keep"));
        storage.upsert(&original).await.unwrap();
        storage.upsert(&record("u1", "at-2", None)).await.unwrap();

        let stored = storage.get("u1", "google").await.unwrap().unwrap();
        assert_eq!(stored.record.refresh_token.as_deref(), Some("rt-keep"));
        assert_eq!(stored.record.access_token.as_deref(), Some("at-2"));
        assert_eq!(
            stored.record.created_at.timestamp(),
            original.created_at.timestamp()
        );
    }

    #[tokio::test]
    async fn get_reports_not_found() {
        let storage = memory_storage().await;
        assert!(storage.get("nobody", "google").await.unwrap().is_none());
        assert!(storage.find_by_subject("nobody", "google").await.unwrap().is_none());
        assert!(storage.find_by_email("nobody@x.io", "google").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_tables_are_reachable_by_subject_and_email() {
        let storage = memory_storage().await;
        let mut login = record("legacy-user", "at-l", Some("rt-l"));
        login.email = Some("Owner@Furriyadh.com".into());
        storage
            .save(&StoredCredential {
                table: TokenTable::UserOauthTokens,
                record: login,
                reauth_required: false,
            })
            .await
            .unwrap();

        let mut ads = record("1234567890", "at-a", Some("rt-a"));
        ads.email = Some("mcc@furriyadh.com".into());
        storage
            .save(&StoredCredential {
                table: TokenTable::GoogleAdsCredentials,
                record: ads,
                reauth_required: false,
            })
            .await
            .unwrap();

        let by_subject = storage
            .find_by_subject("legacy-user", "google")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_subject.table, TokenTable::UserOauthTokens);

        let by_email = storage
            .find_by_email("owner@furriyadh.com", "google")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.record.subject_id, "legacy-user");

        let mcc = storage
            .find_by_email("mcc@furriyadh.com", "google")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mcc.table, TokenTable::GoogleAdsCredentials);
        assert_eq!(mcc.record.refresh_token.as_deref(), Some("rt-a"));

        assert_eq!(storage.list_refreshable().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reauth_marked_and_tokenless_rows_are_not_refreshable() {
        let storage = memory_storage().await;
        storage.upsert(&record("dead", "at", Some("rt"))).await.unwrap();
        storage.upsert(&record("tokenless", "at", None)).await.unwrap();
        storage.upsert(&record("alive", "at", Some("rt2"))).await.unwrap();

        storage
            .mark_reauth_required(TokenTable::OauthTokens, "dead", "google")
            .await
            .unwrap();

        let subjects: Vec<String> = storage
            .list_refreshable()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.record.subject_id)
            .collect();
        assert_eq!(subjects, vec!["alive".to_string()]);

        let dead = storage.get("dead", "google").await.unwrap().unwrap();
        assert!(dead.reauth_required);

        // Fresh consent revives it.
        storage.upsert(&record("dead", "at-new", Some("rt-new"))).await.unwrap();
        let revived = storage.get("dead", "google").await.unwrap().unwrap();
        assert!(!revived.reauth_required);
    }
}
