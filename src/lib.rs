pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod google_oauth;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod service;
pub mod types;

pub use error::{KeeperError, RefreshError};
pub use google_oauth::credentials::CredentialRecord;
pub use google_oauth::service::TokenRefresher;
