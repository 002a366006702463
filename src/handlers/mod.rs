pub mod cookies;
pub mod cron;
pub mod google_ads;
pub mod google_oauth;
pub mod session_sync;
