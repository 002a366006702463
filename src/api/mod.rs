pub mod google_ads_api;

pub use google_ads_api::GoogleAdsApi;
