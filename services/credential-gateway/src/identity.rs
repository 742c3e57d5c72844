//! Resource-owner password credentials exchange against the identity provider.
//!
//! Every failure mode of the exchange (provider rejection, provider error,
//! transport failure, timeout, unparseable reply) ends as
//! [`TokenOutcome::NoToken`]. A provider outage therefore looks exactly like a
//! wrong password to the caller; the distinction only survives in the logs.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use zeroize::Zeroize;

use crate::config::GatewayConfig;
use crate::credentials::{AccessToken, Credentials};
use crate::error::AcquireFailure;

/// Result of a token exchange.
#[derive(Debug)]
pub enum TokenOutcome {
    Token(AccessToken),
    NoToken,
}

/// Source of bearer tokens for a username/password pair.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange the credentials for a token. Never fails; every error is
    /// reported as [`TokenOutcome::NoToken`].
    async fn acquire_token(&self, credentials: &Credentials) -> TokenOutcome;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<AccessToken>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Confidential client performing the `password` grant.
#[derive(Clone)]
pub struct IdentityClient {
    token_endpoint: Url,
    client_id: String,
    client_secret: String,
    scope: String,
    client: reqwest::Client,
}

impl IdentityClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope_param(),
            client,
        })
    }

    async fn exchange(&self, credentials: &Credentials) -> Result<AccessToken, AcquireFailure> {
        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", credentials.username()),
            ("password", credentials.password()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .client
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let mut body = response.text().await?;
        let parsed = serde_json::from_str::<TokenResponse>(&body);
        body.zeroize();

        let parsed = parsed.map_err(|error| AcquireFailure::Malformed {
            status,
            reason: format!(
                "{:?} error at line {} column {}",
                error.classify(),
                error.line(),
                error.column()
            ),
        })?;

        match parsed {
            TokenResponse {
                access_token: Some(token),
                ..
            } if status.is_success() && !token.is_empty() => Ok(token),
            TokenResponse {
                error: Some(error),
                error_description,
                ..
            } => Err(AcquireFailure::Rejected {
                status,
                error,
                description: error_description.unwrap_or_default(),
            }),
            _ => Err(AcquireFailure::Malformed {
                status,
                reason: "response carried no access token".to_string(),
            }),
        }
    }
}

#[async_trait]
impl IdentityProvider for IdentityClient {
    async fn acquire_token(&self, credentials: &Credentials) -> TokenOutcome {
        let username = credentials.username();
        match self.exchange(credentials).await {
            Ok(token) => TokenOutcome::Token(token),
            Err(failure) => {
                tracing::error!(
                    event = "token_acquisition_failed",
                    username,
                    error = %failure,
                    "an error occurred during token acquisition"
                );
                TokenOutcome::NoToken
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use common_config::ServiceConfig;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

    fn config_for(authority: &str) -> GatewayConfig {
        let vars: HashMap<String, String> = [
            ("CLIENT_ID", "gateway-client"),
            ("TENANT_ID", "tenant-1"),
            ("CLIENT_SECRET", "client-secret-value"),
            ("AUTHORITY", authority),
            ("SCOPES", "api://resource/.default"),
            ("TIMEOUT", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        GatewayConfig::from_source(&vars).expect("valid config")
    }

    async fn client_with(server: &MockServer) -> IdentityClient {
        let authority = format!("{}/tenant-1", server.uri());
        IdentityClient::new(&config_for(&authority)).expect("client")
    }

    #[tokio::test]
    async fn successful_exchange_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("client_id=gateway-client"))
            .and(body_string_contains("client_secret=client-secret-value"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=correct-horse"))
            .and(body_string_contains("scope=api%3A%2F%2Fresource%2F.default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "token-abc",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(&server).await;
        let outcome = client
            .acquire_token(&Credentials::new("alice", "correct-horse"))
            .await;

        match outcome {
            TokenOutcome::Token(token) => assert_eq!(token.secret(), "token-abc"),
            TokenOutcome::NoToken => panic!("expected a token"),
        }
    }

    #[tokio::test]
    async fn provider_rejection_yields_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50126: Error validating credentials",
            })))
            .mount(&server)
            .await;

        let client = client_with(&server).await;
        let outcome = client
            .acquire_token(&Credentials::new("alice", "wrong"))
            .await;
        assert!(matches!(outcome, TokenOutcome::NoToken));
    }

    #[tokio::test]
    async fn malformed_reply_yields_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = client_with(&server).await;
        let outcome = client.acquire_token(&Credentials::new("alice", "pw")).await;
        assert!(matches!(outcome, TokenOutcome::NoToken));
    }

    #[tokio::test]
    async fn success_status_without_token_yields_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_type": "Bearer" })))
            .mount(&server)
            .await;

        let client = client_with(&server).await;
        let outcome = client.acquire_token(&Credentials::new("alice", "pw")).await;
        assert!(matches!(outcome, TokenOutcome::NoToken));
    }

    #[tokio::test]
    async fn slow_provider_yields_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "late-token" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = client_with(&server).await;
        let outcome = client.acquire_token(&Credentials::new("alice", "pw")).await;
        assert!(matches!(outcome, TokenOutcome::NoToken));
    }

    #[tokio::test]
    async fn unreachable_provider_yields_no_token() {
        let client = IdentityClient::new(&config_for("http://127.0.0.1:1/tenant-1")).expect("client");
        let outcome = client.acquire_token(&Credentials::new("alice", "pw")).await;
        assert!(matches!(outcome, TokenOutcome::NoToken));
    }
}
