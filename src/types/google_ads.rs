use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccessibleCustomersResponse {
    #[serde(default)]
    pub resource_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessibleAccount {
    pub customer_id: String,
    pub resource_name: String,
}

impl ListAccessibleCustomersResponse {
    pub fn into_accounts(self) -> Vec<AccessibleAccount> {
        self.resource_names
            .into_iter()
            .map(|resource_name| AccessibleAccount {
                customer_id: resource_name
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                resource_name,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct AccountsResponse {
    pub accounts: Vec<AccessibleAccount>,
}
