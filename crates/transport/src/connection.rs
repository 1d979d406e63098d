//! Connection - single-owner local stream socket with bounded reads
//!
//! Every read and write is a whole-message operation: a read either fills the
//! caller's buffer completely or fails, a write either sends every byte or
//! fails. Reads take an optional timeout; `None` waits indefinitely. Timeouts
//! are reported as [`ConnectionError::TimedOut`], separate from transport
//! failures, so callers can decide between retrying and reconnecting.

use crate::Endpoint;
use std::future::Future;
use std::io::{self, IoSlice};
use std::os::fd::AsRawFd;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::UCred;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connect to {endpoint} failed: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out waiting for data")]
    TimedOut,

    #[error("Peer closed the connection")]
    Closed,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Connection is not open")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// True for the "no data yet" outcome, false for hard failures
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::TimedOut)
    }
}

/// One open stream socket, released on drop or [`Connection::close`]
#[derive(Debug)]
pub struct Connection {
    stream: Option<UnixStream>,
    peer: String,
}

impl Connection {
    /// Connect to a daemon endpoint
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, ConnectionError> {
        let stream = endpoint
            .connect()
            .await
            .map_err(|source| ConnectionError::ConnectFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        debug!("Connected to {}", endpoint);
        Ok(Self {
            stream: Some(stream),
            peer: endpoint.to_string(),
        })
    }

    /// Wrap an already established stream (e.g. an accepted client)
    pub fn from_stream(stream: UnixStream) -> Self {
        let peer = stream
            .peer_cred()
            .ok()
            .and_then(|cred| cred.pid())
            .map(|pid| format!("pid:{}", pid))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            stream: Some(stream),
            peer,
        }
    }

    /// Human-readable peer description for logs
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Credentials of the process on the other end
    pub fn peer_credentials(&self) -> Result<UCred, ConnectionError> {
        Ok(self.stream()?.peer_cred()?)
    }

    /// Read exactly `buf.len()` bytes
    pub async fn read_data(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, ConnectionError> {
        let expected = buf.len();
        let stream = self.stream_mut()?;

        bounded(timeout, stream.read_exact(buf))
            .await?
            .map_err(map_read_error)?;

        trace!("Read {} bytes", expected);
        Ok(expected)
    }

    /// Fill every segment in order, all under one timeout
    pub async fn read_msg(
        &mut self,
        segments: &mut [&mut [u8]],
        timeout: Option<Duration>,
    ) -> Result<usize, ConnectionError> {
        let stream = self.stream_mut()?;

        let fill = async {
            let mut total = 0;
            for segment in segments.iter_mut() {
                stream.read_exact(segment).await?;
                total += segment.len();
            }
            Ok::<_, io::Error>(total)
        };

        let total = bounded(timeout, fill).await?.map_err(map_read_error)?;
        trace!("Read {} bytes in scattered message", total);
        Ok(total)
    }

    /// Write the whole buffer or fail
    pub async fn write_data(&mut self, buf: &[u8]) -> Result<usize, ConnectionError> {
        let expected = buf.len();
        let stream = self.stream_mut()?;

        let mut written = 0;
        while written < expected {
            match stream.write(&buf[written..]).await? {
                0 => return Err(ConnectionError::ShortWrite { written, expected }),
                n => written += n,
            }
        }

        trace!("Wrote {} bytes", written);
        Ok(written)
    }

    /// Gather-write every segment or fail
    pub async fn write_msg(&mut self, segments: &[&[u8]]) -> Result<usize, ConnectionError> {
        let expected: usize = segments.iter().map(|s| s.len()).sum();
        let stream = self.stream_mut()?;

        let mut slices: Vec<IoSlice<'_>> = segments.iter().map(|s| IoSlice::new(s)).collect();
        let mut remaining: &mut [IoSlice<'_>] = &mut slices;
        IoSlice::advance_slices(&mut remaining, 0);

        let mut written = 0;
        while !remaining.is_empty() {
            let n = stream.write_vectored(&*remaining).await?;
            if n == 0 {
                return Err(ConnectionError::ShortWrite { written, expected });
            }
            written += n;
            IoSlice::advance_slices(&mut remaining, n);
        }

        trace!("Wrote {} bytes in gathered message", written);
        Ok(written)
    }

    /// Wait until the socket is readable without consuming anything
    ///
    /// A peer hang-up also counts as readable; the following read reports it.
    pub async fn wait_data(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        let stream = self.stream()?;
        bounded(timeout, stream.readable()).await??;
        Ok(())
    }

    /// Peek at the peer without blocking or consuming data
    pub fn is_connection_alive(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };

        let mut peek = [0u8; 1];
        // SAFETY: the descriptor is owned by `stream`, which outlives this call,
        // and `peek` is a valid one-byte buffer.
        let rc = unsafe {
            libc::recv(
                stream.as_raw_fd(),
                peek.as_mut_ptr().cast(),
                peek.len(),
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };

        match rc {
            0 => false,
            n if n > 0 => true,
            _ => {
                let err = io::Error::last_os_error();
                matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                )
            }
        }
    }

    /// Release the socket; the connection cannot be reused afterwards
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed connection to {}", self.peer);
        }
    }

    fn stream(&self) -> Result<&UnixStream, ConnectionError> {
        self.stream.as_ref().ok_or(ConnectionError::NotConnected)
    }

    fn stream_mut(&mut self) -> Result<&mut UnixStream, ConnectionError> {
        self.stream.as_mut().ok_or(ConnectionError::NotConnected)
    }
}

async fn bounded<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, ConnectionError> {
    match timeout {
        None => Ok(fut.await),
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ConnectionError::TimedOut),
    }
}

fn map_read_error(err: io::Error) -> ConnectionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => ConnectionError::Closed,
        _ => ConnectionError::Io(err),
    }
}
