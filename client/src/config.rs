//! Client configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use teebroker_protocol::{DEFAULT_ENDPOINT, MAX_PAYLOAD_SIZE};
use teebroker_transport::Endpoint;

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Daemon endpoint (`#name` for abstract sockets, otherwise a path)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// How long to wait for each response, in ms (0 = forever)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Largest payload the client will send or accept
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    /// Counter value before the first command id
    #[serde(default)]
    pub initial_command_id: u32,
}

impl ClientConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Config pointing at a specific endpoint, defaults otherwise
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> std::io::Result<Endpoint> {
        self.endpoint.parse()
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        match self.response_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_response_timeout_ms() -> u64 {
    5_000
}

fn default_max_payload() -> usize {
    MAX_PAYLOAD_SIZE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            response_timeout_ms: default_response_timeout_ms(),
            max_payload: default_max_payload(),
            initial_command_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, "#teebrokerd");
        assert_eq!(config.response_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
endpoint = "/run/teebroker/socket"
response_timeout_ms = 0
"#,
        )
        .unwrap();

        assert_eq!(config.endpoint().unwrap(), Endpoint::path("/run/teebroker/socket"));
        assert_eq!(config.response_timeout(), None);
        assert_eq!(config.max_payload, MAX_PAYLOAD_SIZE);
    }
}
