use crate::error::KeeperError;
use crate::types::google_ads::{AccessibleAccount, ListAccessibleCustomersResponse};
use reqwest::StatusCode;
use tracing::{error, warn};
use url::Url;

/// Stateless Google Ads REST calls.
pub struct GoogleAdsApi;

impl GoogleAdsApi {
    /// `GET customers:listAccessibleCustomers` for the token's user.
    pub async fn list_accessible_customers(
        client: &reqwest::Client,
        base: &Url,
        developer_token: &str,
        access_token: &str,
    ) -> Result<Vec<AccessibleAccount>, KeeperError> {
        let url = base.join("./customers:listAccessibleCustomers")?; // "./" keeps "customers:" from parsing as a scheme
        let resp = client
            .get(url)
            .bearer_auth(access_token)
            .header("developer-token", developer_token)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Google Ads rejected the access token");
            return Err(KeeperError::ReauthRequired);
        }
        if !status.is_success() {
            error!("Google Ads listAccessibleCustomers failed: {}", status);
            return Err(KeeperError::UpstreamStatus(status));
        }

        let body: ListAccessibleCustomersResponse = resp.json().await?;
        Ok(body.into_accounts())
    }
}
