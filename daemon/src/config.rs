//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teebroker_protocol::{DEFAULT_ENDPOINT, MAX_PAYLOAD_SIZE};
use teebroker_storage::{IdentityScope, RegistryConfig as StorageRegistryConfig};
use teebroker_transport::Endpoint;
use tracing::info;

/// Daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl DaemonConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            info!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Load and merge configuration from file (incremental update)
    ///
    /// Only non-default values from the new config overwrite existing values.
    pub async fn load_merge(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read_to_string(path).await?;
        let other: DaemonConfig = toml::from_str(&content)?;
        self.merge(other);
        Ok(())
    }

    /// Merge another config into this one (incremental)
    ///
    /// Scalar values overwrite if the new value differs from the default.
    pub fn merge(&mut self, other: DaemonConfig) {
        // Server config
        if other.server.endpoint != default_endpoint() {
            self.server.endpoint = other.server.endpoint;
        }
        if other.server.max_connections != default_max_connections() {
            self.server.max_connections = other.server.max_connections;
        }
        if other.server.idle_timeout_ms != 0 {
            self.server.idle_timeout_ms = other.server.idle_timeout_ms;
        }

        // Registry config
        if other.registry.root != default_registry_root() {
            self.registry.root = other.registry.root;
        }
        if other.registry.scope != IdentityScope::default() {
            self.registry.scope = other.registry.scope;
        }
        if other.registry.max_object_size != default_max_object_size() {
            self.registry.max_object_size = other.registry.max_object_size;
        }

        // Monitoring
        if other.monitoring.prometheus_enabled {
            self.monitoring.prometheus_enabled = true;
        }
        if other.monitoring.prometheus_bind != default_prometheus_bind() {
            self.monitoring.prometheus_bind = other.monitoring.prometheus_bind;
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listening endpoint (`#name` for an abstract socket, otherwise a path)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long to wait for the next command, in ms (0 = forever)
    #[serde(default)]
    pub idle_timeout_ms: u64,
}

impl ServerConfig {
    pub fn endpoint(&self) -> std::io::Result<Endpoint> {
        self.endpoint.parse()
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_max_connections() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_connections: default_max_connections(),
            idle_timeout_ms: 0,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding one entry per identity
    #[serde(default = "default_registry_root")]
    pub root: PathBuf,

    /// Whether entries are per caller or device-wide
    #[serde(default)]
    pub scope: IdentityScope,

    /// Largest secure object accepted
    #[serde(default = "default_max_object_size")]
    pub max_object_size: usize,
}

impl RegistryConfig {
    /// Settings handed to the storage layer
    pub fn storage(&self) -> StorageRegistryConfig {
        StorageRegistryConfig {
            max_object_size: self.max_object_size,
        }
    }
}

fn default_registry_root() -> PathBuf {
    PathBuf::from("/data/vendor/teebroker/registry")
}

fn default_max_object_size() -> usize {
    MAX_PAYLOAD_SIZE
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: default_registry_root(),
            scope: IdentityScope::default(),
            max_object_size: default_max_object_size(),
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Prometheus metrics bind address
    #[serde(default = "default_prometheus_bind")]
    pub prometheus_bind: SocketAddr,

    /// Enable Prometheus
    #[serde(default)]
    pub prometheus_enabled: bool,
}

fn default_prometheus_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9464))
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_bind: default_prometheus_bind(),
            prometheus_enabled: false,
        }
    }
}
