//! Local-socket command handler

use crate::config::ServerConfig;
use crate::dispatcher::SharedCommandDispatcher;
use crate::metrics::Metrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use teebroker_protocol::{
    CommandSequence, ResultCode, SequenceObservation, ValidationError, validate_command,
};
use teebroker_storage::{IdentityKey, IdentityScope};
use teebroker_transport::{Connection, ConnectionError, FrameCodec, FrameError};
use tokio::net::UnixListener;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

/// Everything a connection task needs
pub struct ServerContext {
    pub server: ServerConfig,
    pub scope: IdentityScope,
    pub codec: FrameCodec,
    pub dispatcher: SharedCommandDispatcher,
    pub metrics: Arc<Metrics>,
}

/// Accept clients until `shutdown` flips (or its sender goes away)
pub async fn serve(
    listener: UnixListener,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let limit = Arc::new(Semaphore::new(ctx.server.max_connections.max(1)));
    info!(
        "Accepting clients (max {} connections)",
        ctx.server.max_connections
    );

    loop {
        let permit = tokio::select! {
            permit = limit.clone().acquire_owned() => permit?,
            _ = shutdown.changed() => break,
        };

        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handle_connection(Connection::from_stream(stream), ctx, shutdown).await;
        });
    }

    info!("Stopped accepting clients");
    Ok(())
}

/// Serve one client until it disconnects, misbehaves or the daemon stops
pub async fn handle_connection(
    mut conn: Connection,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let identity = match conn.peer_credentials() {
        Ok(cred) => IdentityKey::resolve(ctx.scope, cred.uid()),
        Err(e) => {
            warn!("Rejecting {}: no peer credentials ({})", conn.peer(), e);
            conn.close();
            return;
        }
    };

    debug!("Client {} connected as {}", conn.peer(), identity);
    ctx.metrics.active_connections.inc();

    match serve_commands(&mut conn, &identity, &ctx, &mut shutdown).await {
        Ok(()) => debug!("Client {} done", conn.peer()),
        Err(FrameError::Connection(ConnectionError::Closed)) => {
            debug!("Client {} disconnected", conn.peer())
        }
        Err(e) => warn!("Dropping client {}: {}", conn.peer(), e),
    }

    ctx.metrics.active_connections.dec();
    conn.close();
}

async fn serve_commands(
    conn: &mut Connection,
    identity: &IdentityKey,
    ctx: &ServerContext,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), FrameError> {
    let codec = ctx.codec;
    let idle = ctx.server.idle_timeout();
    let mut sequence = CommandSequence::new();

    loop {
        let next = tokio::select! {
            header = codec.recv_command_header(conn, idle) => Some(header),
            _ = shutdown.changed() => None,
        };

        let header = match next {
            Some(Ok(header)) => header,
            Some(Err(e)) if e.is_timeout() => {
                debug!("Client {} idle, closing", conn.peer());
                return Ok(());
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        };

        let started = Instant::now();

        if let SequenceObservation::Gap { previous, current } = sequence.observe(header.id) {
            warn!(
                "Command id gap from {}: {} after {}",
                conn.peer(),
                current,
                previous
            );
            ctx.metrics.sequence_gaps.inc();
        }

        let command = match validate_command(&header, codec.max_payload()) {
            Ok(command) => command,
            Err(e @ ValidationError::PayloadTooLarge { .. }) => {
                // The oversized payload is never read, so the stream cannot be resynchronized
                warn!("Command {} from {}: {}", header.id, conn.peer(), e);
                codec
                    .send_response(conn, header.id, e.result_code(), &[])
                    .await?;
                ctx.metrics
                    .record("invalid", e.result_code(), 0, started.elapsed());
                return Ok(());
            }
            Err(e) => {
                warn!("Command {} from {}: {}", header.id, conn.peer(), e);
                codec.recv_payload(conn, header.data_size, idle).await?;
                codec
                    .send_response(conn, header.id, e.result_code(), &[])
                    .await?;
                ctx.metrics
                    .record("invalid", e.result_code(), 0, started.elapsed());
                continue;
            }
        };

        let payload = codec.recv_payload(conn, header.data_size, idle).await?;
        let size = payload.len();
        debug!(
            "{} id={} from {} size={}",
            command.name(),
            header.id,
            identity,
            size
        );

        let reply = ctx.dispatcher.dispatch(identity, command, payload).await;
        if reply.result == ResultCode::StorageError {
            ctx.metrics.storage_errors.inc();
        }

        codec
            .send_response(conn, header.id, reply.result, &reply.payload)
            .await?;
        ctx.metrics
            .record(command.name(), reply.result, size, started.elapsed());
    }
}
