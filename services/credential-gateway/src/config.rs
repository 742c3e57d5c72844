use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use common_config::{
    flag, optional, parse_or, required, ConfigError, ConfigSource, ServiceConfig,
};
use common_obs::ObsSettings;
use reqwest::Url;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const DEFAULT_RESOURCE_URL: &str = "https://graph.microsoft.com/v1.0/me";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;

const TOKEN_PATH: &str = "oauth2/v2.0/token";

/// Process-wide gateway settings, validated once before the listener starts.
#[derive(Clone)]
pub struct GatewayConfig {
    pub client_id: String,
    pub tenant_id: String,
    pub client_secret: String,
    pub authority: Url,
    pub token_endpoint: Url,
    pub scopes: Vec<String>,
    pub resource_url: Url,
    pub timeout: Duration,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
    pub listen_addr: SocketAddr,
}

impl GatewayConfig {
    pub fn obs_settings(&self) -> ObsSettings {
        ObsSettings {
            debug: self.debug,
            log_file: self.log_file.clone(),
        }
    }

    /// Scopes in the space-separated form the token endpoint expects.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_secret", &"[REDACTED]")
            .field("authority", &self.authority.as_str())
            .field("scopes", &self.scopes)
            .field("resource_url", &self.resource_url.as_str())
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("log_file", &self.log_file)
            .field("listen_addr", &self.listen_addr)
            .finish()
    }
}

impl ServiceConfig for GatewayConfig {
    fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let client_id = required(source, "CLIENT_ID")?;
        let tenant_id = required(source, "TENANT_ID")?;
        let client_secret = required(source, "CLIENT_SECRET")?;

        let authority_raw = optional(source, "AUTHORITY")
            .unwrap_or_else(|| format!("{DEFAULT_AUTHORITY_HOST}/{tenant_id}"));
        let authority = parse_url("AUTHORITY", &authority_raw)?;
        let token_endpoint = parse_url(
            "AUTHORITY",
            &format!("{}/{TOKEN_PATH}", authority_raw.trim_end_matches('/')),
        )?;

        let scopes: Vec<String> = optional(source, "SCOPES")
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let resource_url = parse_url(
            "RESOURCE_URL",
            &optional(source, "RESOURCE_URL").unwrap_or_else(|| DEFAULT_RESOURCE_URL.to_string()),
        )?;

        let timeout_secs = parse_or(source, "TIMEOUT", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "TIMEOUT".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }

        let bind_address = optional(source, "GATEWAY_BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let port: u16 = parse_or(source, "GATEWAY_PORT", DEFAULT_PORT)?;
        let listen_addr: SocketAddr = format!("{bind_address}:{port}").parse().map_err(
            |error: std::net::AddrParseError| ConfigError::Invalid {
                var: "GATEWAY_BIND_ADDRESS".to_string(),
                reason: error.to_string(),
            },
        )?;

        Ok(Self {
            client_id,
            tenant_id,
            client_secret,
            authority,
            token_endpoint,
            scopes,
            resource_url,
            timeout: Duration::from_secs(timeout_secs),
            debug: flag(source, "DEBUG", false),
            log_file: optional(source, "LOG_FILE_APP").map(PathBuf::from),
            listen_addr,
        })
    }
}

fn parse_url(var: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|error| ConfigError::Invalid {
        var: var.to_string(),
        reason: error.to_string(),
    })
}
