//! Integration Test Harness
#![allow(dead_code)]
//!
//! Runs the daemon in-process on a temporary socket and registry, and builds
//! clients pointed at it.

use std::path::{Path, PathBuf};
use std::time::Duration;
use teebroker_client::{ClientConfig, RegistryClient};
use teebroker_daemon::config::DaemonConfig;
use teebroker_storage::IdentityScope;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A daemon serving from a private temp directory
pub struct TestDaemon {
    dir: TempDir,
    config: DaemonConfig,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestDaemon {
    /// Start with caller-scoped entries
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start after adjusting the default test configuration
    pub async fn start_with(adjust: impl FnOnce(&mut DaemonConfig)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = test_config(dir.path());
        adjust(&mut config);
        Self::spawn(dir, config).await
    }

    /// Start on a directory and config left behind by [`TestDaemon::stop`]
    pub async fn resume(dir: TempDir, config: DaemonConfig) -> Self {
        Self::spawn(dir, config).await
    }

    async fn spawn(dir: TempDir, config: DaemonConfig) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let run_config = config.clone();
        let task = tokio::spawn(async move { teebroker_daemon::run(&run_config, rx).await });

        assert!(
            wait_for_socket(&socket_path(dir.path()), Duration::from_secs(5)).await,
            "Daemon did not start in time"
        );

        Self {
            dir,
            config,
            shutdown,
            task,
        }
    }

    pub fn socket(&self) -> PathBuf {
        socket_path(self.dir.path())
    }

    pub fn registry_root(&self) -> PathBuf {
        self.config.registry.root.clone()
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::with_endpoint(self.socket().to_string_lossy().to_string());
        config.response_timeout_ms = 2_000;
        config
    }

    pub fn client(&self) -> RegistryClient {
        RegistryClient::new(self.client_config())
    }

    /// Stop serving, keeping the temp directory (and registry) alive
    pub async fn stop(self) -> (TempDir, DaemonConfig) {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .expect("Daemon task panicked")
            .expect("Daemon failed");
        (self.dir, self.config)
    }

    /// Start again on the same socket and registry
    pub async fn restart(self) -> Self {
        let (dir, config) = self.stop().await;
        Self::spawn(dir, config).await
    }
}

pub fn test_config(dir: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.server.endpoint = socket_path(dir).to_string_lossy().to_string();
    config.server.max_connections = 8;
    config.registry.root = dir.join("registry");
    config.registry.scope = IdentityScope::Caller;
    config
}

fn socket_path(dir: &Path) -> PathBuf {
    dir.join("teebrokerd.sock")
}

/// Wait for the daemon socket to accept connections
pub async fn wait_for_socket(path: &Path, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::UnixStream::connect(path).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Random blob of the given size
pub fn random_blob(size: usize) -> Vec<u8> {
    use rand::RngCore;

    let mut blob = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut blob);
    blob
}
