use async_trait::async_trait;
use reqwest::Url;

use crate::config::GatewayConfig;
use crate::credentials::AccessToken;
use crate::error::ResourceError;

/// Confirms that a protected resource honours a bearer token.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// `Ok(true)` when the resource accepts the token, `Ok(false)` for any
    /// other status. Transport failures and timeouts are returned as errors.
    async fn validate(&self, token: &AccessToken, username: &str) -> Result<bool, ResourceError>;
}

#[derive(Clone)]
pub struct ResourceValidator {
    endpoint: Url,
    client: reqwest::Client,
}

impl ResourceValidator {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            endpoint: config.resource_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl TokenValidator for ResourceValidator {
    async fn validate(&self, token: &AccessToken, username: &str) -> Result<bool, ResourceError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(token.secret())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(username, "token for {username} validated successfully");
            Ok(true)
        } else {
            tracing::warn!(
                username,
                status = status.as_u16(),
                "token for {username} could not be validated"
            );
            Ok(false)
        }
    }
}
