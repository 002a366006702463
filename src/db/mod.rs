//! Database module: token table shapes, schema and the Token Store.
//!
//! Layout:
//! - `models.rs`: row structs for each table and their mapping to `CredentialRecord`
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: `CredentialsStorage`, the upsert-by-key accessor

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{StoredCredential, TokenTable};
pub use schema::SQLITE_INIT;
pub use sqlite::{CredentialsStorage, SqlitePool};
