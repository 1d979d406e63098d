//! Auth-token registry client
//!
//! Each call is one command/response exchange on a single connection. Any
//! outcome other than a paired response (transport failure, timeout, id
//! mismatch, desync) discards the connection together with its sequence
//! state; the next call reconnects from scratch.

use bytes::Bytes;
use teebroker_protocol::{
    Command, ResultCode, SequenceError, SequenceTracker, validate_response,
};
use teebroker_transport::{Connection, ConnectionError, FrameCodec, FrameError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClientConfig;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No auth token stored for this caller")]
    NotFound,

    #[error("Transport error: {0}")]
    Transport(#[source] ConnectionError),

    #[error("Timed out waiting for the daemon")]
    Timeout,

    #[error("Protocol desynchronized: response {received} for command {expected}")]
    ProtocolDesync { expected: u32, received: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Daemon storage error")]
    Storage,

    #[error("Daemon rejected the request: {0}")]
    Rejected(ResultCode),

    #[error("Object too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Coarse outcome of a registry call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Ok,
    NotFound,
    TransportError,
    ProtocolDesync,
    StorageError,
    /// The request itself was refused (bad size, unknown command)
    InvalidRequest,
}

impl ResultKind {
    pub fn of<T>(result: &Result<T, RegistryError>) -> Self {
        match result {
            Ok(_) => ResultKind::Ok,
            Err(e) => e.kind(),
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ResultKind {
        match self {
            RegistryError::NotFound => ResultKind::NotFound,
            RegistryError::Transport(_) | RegistryError::Timeout => ResultKind::TransportError,
            RegistryError::ProtocolDesync { .. } | RegistryError::Protocol(_) => {
                ResultKind::ProtocolDesync
            }
            RegistryError::Storage => ResultKind::StorageError,
            RegistryError::Rejected(_) | RegistryError::TooLarge { .. } => {
                ResultKind::InvalidRequest
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound)
    }
}

/// Client side of the registry protocol
pub struct RegistryClient {
    config: ClientConfig,
    codec: FrameCodec,
    conn: Option<Connection>,
    sequence: SequenceTracker,
}

impl RegistryClient {
    /// Create a client that connects on first use
    pub fn new(config: ClientConfig) -> Self {
        let codec = FrameCodec::new(config.max_payload);
        let sequence = SequenceTracker::new(config.initial_command_id);
        Self {
            config,
            codec,
            conn: None,
            sequence,
        }
    }

    /// Create a client and connect immediately
    pub async fn connect(config: ClientConfig) -> Result<Self, RegistryError> {
        let mut client = Self::new(config);
        client.reconnect().await?;
        Ok(client)
    }

    /// Store (or replace) the caller's auth token
    pub async fn store_auth_token(&mut self, blob: &[u8]) -> Result<(), RegistryError> {
        self.execute(Command::WriteAuthToken, blob).await?;
        Ok(())
    }

    /// Read the caller's auth token
    pub async fn read_auth_token(&mut self) -> Result<Vec<u8>, RegistryError> {
        let payload = self.execute(Command::ReadAuthToken, &[]).await?;
        Ok(payload.to_vec())
    }

    /// Delete the caller's auth token
    pub async fn delete_auth_token(&mut self) -> Result<(), RegistryError> {
        self.execute(Command::DeleteAuthToken, &[]).await?;
        Ok(())
    }

    /// Whether a connection is open and the daemon still answers
    pub fn is_connection_alive(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|conn| conn.is_connection_alive())
    }

    /// Drop any current connection and open a fresh one
    pub async fn reconnect(&mut self) -> Result<(), RegistryError> {
        self.disconnect();

        let endpoint = self
            .config
            .endpoint()
            .map_err(|e| RegistryError::Transport(ConnectionError::Io(e)))?;
        let conn = Connection::connect(&endpoint)
            .await
            .map_err(RegistryError::Transport)?;

        self.conn = Some(conn);
        Ok(())
    }

    /// Close the connection and forget its sequence state
    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.sequence.reset(self.config.initial_command_id);
    }

    /// Id of the most recent command sent on the current connection
    pub fn last_command_id(&self) -> u32 {
        self.sequence.last_issued()
    }

    async fn execute(&mut self, command: Command, payload: &[u8]) -> Result<Bytes, RegistryError> {
        if payload.len() > self.codec.max_payload() {
            return Err(RegistryError::TooLarge {
                size: payload.len(),
                max: self.codec.max_payload(),
            });
        }

        if self.sequence.has_outstanding() || self.sequence.is_desynchronized() {
            // An exchange was cancelled before its response arrived
            self.discard("stale sequence state");
        }

        if self.conn.is_none() {
            self.reconnect().await?;
        }

        let id = match self.sequence.issue() {
            Ok(id) => id,
            Err(e) => {
                self.discard("unusable sequence state");
                return Err(sequence_error(e));
            }
        };

        let codec = self.codec;
        let timeout = self.config.response_timeout();
        let conn = self
            .conn
            .as_mut()
            .ok_or(RegistryError::Transport(ConnectionError::NotConnected))?;

        debug!("{} id={} size={}", command.name(), id, payload.len());
        let exchange = match codec.send_command(conn, id, command.code(), payload).await {
            Ok(_) => codec.recv_response(conn, timeout).await,
            Err(e) => Err(e),
        };

        let (header, body) = match exchange {
            Ok(response) => response,
            Err(FrameError::Connection(e)) if e.is_timeout() => {
                self.discard("response timed out");
                return Err(RegistryError::Timeout);
            }
            Err(FrameError::Connection(e)) => {
                self.discard("transport failure");
                return Err(RegistryError::Transport(e));
            }
            Err(e @ FrameError::PayloadTooLarge { .. }) => {
                self.discard("oversized response");
                return Err(RegistryError::Protocol(e.to_string()));
            }
        };

        if let Err(e) = self.sequence.pair(header.id) {
            warn!("{} on {}: {}", command.name(), self.peer(), e);
            self.discard("unpaired response");
            return Err(sequence_error(e));
        }

        let result = match validate_response(&header, codec.max_payload()) {
            Ok(result) => result,
            Err(e) => {
                self.discard("invalid response header");
                return Err(RegistryError::Protocol(e.to_string()));
            }
        };

        match result {
            ResultCode::Ok => Ok(body),
            ResultCode::NotFound => Err(RegistryError::NotFound),
            ResultCode::StorageError => Err(RegistryError::Storage),
            other => Err(RegistryError::Rejected(other)),
        }
    }

    fn discard(&mut self, reason: &str) {
        debug!("Discarding connection to {}: {}", self.peer(), reason);
        self.disconnect();
    }

    fn peer(&self) -> &str {
        self.conn.as_ref().map_or("daemon", |conn| conn.peer())
    }
}

fn sequence_error(err: SequenceError) -> RegistryError {
    match err {
        SequenceError::Desynchronized { expected, received } => {
            RegistryError::ProtocolDesync { expected, received }
        }
        other => RegistryError::Protocol(other.to_string()),
    }
}
