//! Command dispatch onto the secure-object registry

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use teebroker_protocol::{Command, ResultCode};
use teebroker_storage::{IdentityKey, Registry, StorageError};
use tracing::{debug, error, warn};

/// Outcome of one dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub result: ResultCode,
    pub payload: Bytes,
}

impl Reply {
    pub fn ok(payload: Bytes) -> Self {
        Self {
            result: ResultCode::Ok,
            payload,
        }
    }

    pub fn status(result: ResultCode) -> Self {
        Self {
            result,
            payload: Bytes::new(),
        }
    }
}

/// Turns a validated command from an identified caller into a reply
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, identity: &IdentityKey, command: Command, payload: Bytes) -> Reply;
}

pub type SharedCommandDispatcher = Arc<dyn CommandDispatcher>;

/// Serves auth-token commands from a [`Registry`]
///
/// Registry operations do blocking file I/O and run on the blocking pool.
pub struct RegistryDispatcher {
    registry: Arc<Registry>,
}

impl RegistryDispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn execute(
        registry: &Registry,
        identity: &IdentityKey,
        command: Command,
        payload: Bytes,
    ) -> Reply {
        let outcome = match command {
            Command::ReadAuthToken => registry
                .read(identity)
                .map(|object| Reply::ok(Bytes::from(object.into_bytes()))),
            Command::WriteAuthToken => registry
                .store(identity, &payload)
                .map(|()| Reply::status(ResultCode::Ok)),
            Command::DeleteAuthToken => registry
                .delete(identity)
                .map(|()| Reply::status(ResultCode::Ok)),
        };

        outcome.unwrap_or_else(|e| {
            let result = storage_result(&e);
            match result {
                ResultCode::NotFound => debug!("{} for {}: not found", command.name(), identity),
                ResultCode::StorageError => {
                    error!("{} for {} failed: {}", command.name(), identity, e)
                }
                _ => warn!("{} for {} rejected: {}", command.name(), identity, e),
            }
            Reply::status(result)
        })
    }
}

#[async_trait]
impl CommandDispatcher for RegistryDispatcher {
    async fn dispatch(&self, identity: &IdentityKey, command: Command, payload: Bytes) -> Reply {
        let registry = self.registry.clone();
        let key = identity.clone();

        match tokio::task::spawn_blocking(move || Self::execute(&registry, &key, command, payload))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!("{} for {} aborted: {}", command.name(), identity, e);
                Reply::status(ResultCode::StorageError)
            }
        }
    }
}

/// Wire status for a registry failure
pub fn storage_result(err: &StorageError) -> ResultCode {
    match err {
        StorageError::NotFound(_) => ResultCode::NotFound,
        StorageError::TooLarge { .. } => ResultCode::PayloadTooLarge,
        StorageError::InvalidKey(_) => ResultCode::InvalidPayload,
        StorageError::Corrupt(_) | StorageError::SerializationError(_) | StorageError::Io(_) => {
            ResultCode::StorageError
        }
    }
}
