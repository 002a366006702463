//! Google OAuth: canonical credential types, raw endpoints and the refresher built on them.

pub mod credentials;
pub mod endpoints;
pub mod service;

pub use credentials::{CredentialRecord, GoogleUserInfo, RefreshedToken};
pub use service::TokenRefresher;
