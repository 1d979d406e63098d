//! teebroker Daemon
//!
//! Owns the secure-object registry and serves auth-token commands to local
//! clients over a stream socket. Callers are identified by their socket
//! peer credentials.

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod metrics;


use anyhow::{Context, Result};
use std::sync::Arc;
use teebroker_storage::Registry;
use teebroker_transport::FrameCodec;
use tokio::sync::watch;
use tracing::info;

use config::DaemonConfig;
use dispatcher::RegistryDispatcher;
use handler::ServerContext;
use metrics::Metrics;

/// Open the registry, bind the endpoint and serve until `shutdown` flips
///
/// The socket file (for path endpoints) is removed on the way out.
pub async fn run(config: &DaemonConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let registry = Registry::open(&config.registry.root, config.registry.storage())
        .with_context(|| format!("opening registry at {}", config.registry.root.display()))?;
    info!(
        "Registry at {} ({:?} scope)",
        config.registry.root.display(),
        config.registry.scope
    );

    let endpoint = config.server.endpoint()?;
    let listener = endpoint
        .bind()
        .with_context(|| format!("binding {}", endpoint))?;
    info!("Listening on {}", endpoint);

    let ctx = Arc::new(ServerContext {
        server: config.server.clone(),
        scope: config.registry.scope,
        codec: FrameCodec::new(config.registry.max_object_size),
        dispatcher: Arc::new(RegistryDispatcher::new(Arc::new(registry))),
        metrics: Arc::new(Metrics::new()?),
    });

    let result = handler::serve(listener, ctx, shutdown).await;
    endpoint.cleanup();
    result
}
