//! SQL DDL for initializing the credential storage.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema with the three token table shapes:
/// - `oauth_tokens`: canonical, one `(user_id, provider)` per row
/// - `user_oauth_tokens`: login-flow shape, carries `email`, inverse `is_active` flag
/// - `google_ads_credentials`: managed-account shape, expiry as unix seconds,
///   textual `status`, provider implied
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS oauth_tokens (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    expires_at TEXT NOT NULL, -- RFC3339
    scope TEXT NULL,
    needs_reauth INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    UNIQUE(user_id, provider)
);

CREATE TABLE IF NOT EXISTS user_oauth_tokens (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    email TEXT NULL,
    provider TEXT NOT NULL,
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    token_expires_at TEXT NOT NULL, -- RFC3339
    token_type TEXT NULL,
    scope TEXT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    UNIQUE(user_id, provider)
);

CREATE INDEX IF NOT EXISTS idx_user_oauth_tokens_email ON user_oauth_tokens(email);

CREATE TABLE IF NOT EXISTS google_ads_credentials (
    id INTEGER PRIMARY KEY NOT NULL,
    customer_id TEXT NOT NULL UNIQUE,
    manager_email TEXT NULL,
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    token_expiry INTEGER NOT NULL, -- unix seconds
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_google_ads_credentials_manager_email
    ON google_ads_credentials(manager_email);
"#;
