//! Frame codec for exchanging headers and payloads over a [`Connection`]

use crate::{Connection, ConnectionError};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use teebroker_protocol::{
    CommandHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, ResponseHeader, ResultCode,
};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl FrameError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Connection(e) if e.is_timeout())
    }
}

/// Frame codec: 12-byte header followed by `data_size` payload bytes
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec accepting payloads up to `max_payload` bytes
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Send a command header and its payload in one gathered write
    pub async fn send_command(
        &self,
        conn: &mut Connection,
        id: u32,
        cmd: u32,
        payload: &[u8],
    ) -> Result<CommandHeader, FrameError> {
        let data_size = self.check_outgoing(payload)?;
        let header = CommandHeader::new(id, cmd, data_size);
        let head = header.encode();

        conn.write_msg(&[&head[..], payload]).await?;
        trace!("Sent command id={} cmd={} size={}", id, cmd, data_size);
        Ok(header)
    }

    /// Send a response header and its payload in one gathered write
    pub async fn send_response(
        &self,
        conn: &mut Connection,
        id: u32,
        result: ResultCode,
        payload: &[u8],
    ) -> Result<ResponseHeader, FrameError> {
        let data_size = self.check_outgoing(payload)?;
        let header = ResponseHeader::new(id, result.code(), data_size);
        let head = header.encode();

        conn.write_msg(&[&head[..], payload]).await?;
        trace!("Sent response id={} result={} size={}", id, result, data_size);
        Ok(header)
    }

    /// Read the next command header
    ///
    /// The payload is left on the stream so the caller can validate the
    /// header before deciding to read it with [`FrameCodec::recv_payload`].
    pub async fn recv_command_header(
        &self,
        conn: &mut Connection,
        timeout: Option<Duration>,
    ) -> Result<CommandHeader, FrameError> {
        let mut head = [0u8; HEADER_SIZE];
        conn.read_data(&mut head, timeout).await?;
        Ok(CommandHeader::decode(&head))
    }

    /// Read a full response: header, then exactly `data_size` payload bytes
    pub async fn recv_response(
        &self,
        conn: &mut Connection,
        timeout: Option<Duration>,
    ) -> Result<(ResponseHeader, Bytes), FrameError> {
        let mut head = [0u8; HEADER_SIZE];
        conn.read_data(&mut head, timeout).await?;
        let header = ResponseHeader::decode(&head);

        let payload = self.recv_payload(conn, header.data_size, timeout).await?;
        trace!(
            "Received response id={} result={} size={}",
            header.id, header.result, header.data_size
        );
        Ok((header, payload))
    }

    /// Read a payload of the declared size
    pub async fn recv_payload(
        &self,
        conn: &mut Connection,
        data_size: u32,
        timeout: Option<Duration>,
    ) -> Result<Bytes, FrameError> {
        let size = data_size as usize;
        if size > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload,
            });
        }
        if size == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = BytesMut::zeroed(size);
        conn.read_data(&mut buf, timeout).await?;
        Ok(buf.freeze())
    }

    fn check_outgoing(&self, payload: &[u8]) -> Result<u32, FrameError> {
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        // max_payload is far below u32::MAX
        Ok(payload.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Endpoint;
    use teebroker_protocol::Command;
    use tokio::net::UnixStream;

    fn pair() -> (Connection, Connection) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::from_stream(a), Connection::from_stream(b))
    }

    #[tokio::test]
    async fn test_command_exchange() {
        let codec = FrameCodec::default();
        let (mut client, mut daemon) = pair();

        codec
            .send_command(&mut client, 1, Command::WriteAuthToken.code(), b"ABCD1234")
            .await
            .unwrap();

        let header = codec.recv_command_header(&mut daemon, None).await.unwrap();
        assert_eq!(header.id, 1);
        assert_eq!(header.cmd, Command::WriteAuthToken.code());
        assert_eq!(header.data_size, 8);

        let payload = codec
            .recv_payload(&mut daemon, header.data_size, None)
            .await
            .unwrap();
        assert_eq!(&payload[..], b"ABCD1234");
    }

    #[tokio::test]
    async fn test_response_exchange() {
        let codec = FrameCodec::default();
        let (mut client, mut daemon) = pair();

        codec
            .send_response(&mut daemon, 3, ResultCode::NotFound, &[])
            .await
            .unwrap();

        let (header, payload) = codec
            .recv_response(&mut client, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(header, ResponseHeader::new(3, ResultCode::NotFound.code(), 0));
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_both_ways() {
        let codec = FrameCodec::new(4);
        let (mut client, mut daemon) = pair();

        let err = codec
            .send_command(&mut client, 1, Command::WriteAuthToken.code(), b"too long")
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, max: 4 }));

        // A peer declaring more than the limit is refused before reading
        let header = CommandHeader::new(2, Command::WriteAuthToken.code(), 1 << 20);
        client.write_data(&header.encode()).await.unwrap();
        let header = codec.recv_command_header(&mut daemon, None).await.unwrap();
        let err = codec
            .recv_payload(&mut daemon, header.data_size, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_response_timeout() {
        let codec = FrameCodec::default();
        let (_daemon, mut client) = pair();

        let err = codec
            .recv_response(&mut client, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_exchange_over_abstract_endpoint() {
        let codec = FrameCodec::default();
        let endpoint: Endpoint = format!("#teebroker-codec-{}", std::process::id())
            .parse()
            .unwrap();
        let listener = endpoint.bind().unwrap();

        let daemon = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::from_stream(stream);
            let header = codec.recv_command_header(&mut conn, None).await.unwrap();
            let payload = codec
                .recv_payload(&mut conn, header.data_size, None)
                .await
                .unwrap();
            codec
                .send_response(&mut conn, header.id, ResultCode::Ok, &payload)
                .await
                .unwrap();
        });

        let mut client = Connection::connect(&endpoint).await.unwrap();
        assert_eq!(client.peer(), endpoint.to_string());
        codec
            .send_command(&mut client, 1, Command::WriteAuthToken.code(), b"ABCD1234")
            .await
            .unwrap();
        let (header, payload) = codec
            .recv_response(&mut client, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(header.id, 1);
        assert_eq!(header.result, ResultCode::Ok.code());
        assert_eq!(&payload[..], b"ABCD1234");

        daemon.await.unwrap();
    }
}
