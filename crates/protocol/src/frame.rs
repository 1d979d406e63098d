//! Command and response headers - the fixed part of every frame

use bytes::{Buf, BufMut};

/// Encoded size of both header kinds: three little-endian u32 fields
pub const HEADER_SIZE: usize = 12;

/// Header preceding every command sent to the daemon
///
/// Wire layout (little-endian, no padding):
/// ```text
/// 0      4      8      12
/// | id   | cmd  | size |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Free-running counter owned by the sender, incremented once per command
    pub id: u32,

    /// Raw command code, see [`crate::Command`]
    pub cmd: u32,

    /// Number of payload bytes following the header
    pub data_size: u32,
}

/// Header preceding every response sent by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Echo of the id of the command being answered
    pub id: u32,

    /// Raw result code, see [`crate::ResultCode`]
    pub result: u32,

    /// Number of payload bytes following the header
    pub data_size: u32,
}

impl CommandHeader {
    pub fn new(id: u32, cmd: u32, data_size: u32) -> Self {
        Self { id, cmd, data_size }
    }

    /// Serialize into the fixed wire layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        encode_fields(self.id, self.cmd, self.data_size)
    }

    /// Parse a header from exactly [`HEADER_SIZE`] bytes
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let (id, cmd, data_size) = decode_fields(bytes);
        Self { id, cmd, data_size }
    }
}

impl ResponseHeader {
    pub fn new(id: u32, result: u32, data_size: u32) -> Self {
        Self {
            id,
            result,
            data_size,
        }
    }

    /// Serialize into the fixed wire layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        encode_fields(self.id, self.result, self.data_size)
    }

    /// Parse a header from exactly [`HEADER_SIZE`] bytes
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let (id, result, data_size) = decode_fields(bytes);
        Self {
            id,
            result,
            data_size,
        }
    }
}

fn encode_fields(a: u32, b: u32, c: u32) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut cursor = &mut out[..];
    cursor.put_u32_le(a);
    cursor.put_u32_le(b);
    cursor.put_u32_le(c);
    out
}

fn decode_fields(bytes: &[u8; HEADER_SIZE]) -> (u32, u32, u32) {
    let mut cursor = &bytes[..];
    let a = cursor.get_u32_le();
    let b = cursor.get_u32_le();
    let c = cursor.get_u32_le();
    (a, b, c)
}
