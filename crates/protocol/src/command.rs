//! Command and result codes carried in frame headers

use thiserror::Error;

/// Default endpoint the daemon listens on (abstract namespace)
pub const DEFAULT_ENDPOINT: &str = "#teebrokerd";

/// Registry operations understood by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    ReadAuthToken = 0,
    WriteAuthToken = 1,
    DeleteAuthToken = 2,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown command code {0}")]
pub struct UnknownCommand(pub u32);

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether a command of this kind may carry a payload (possibly empty)
    pub fn accepts_payload(self) -> bool {
        matches!(self, Command::WriteAuthToken)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::ReadAuthToken => "read_auth_token",
            Command::WriteAuthToken => "write_auth_token",
            Command::DeleteAuthToken => "delete_auth_token",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = UnknownCommand;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Command::ReadAuthToken),
            1 => Ok(Command::WriteAuthToken),
            2 => Ok(Command::DeleteAuthToken),
            other => Err(UnknownCommand(other)),
        }
    }
}

/// Status reported by the daemon in [`crate::ResponseHeader::result`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResultCode {
    Ok = 0,
    /// No entry exists for the caller's identity
    NotFound = 1,
    /// Persistent storage failed (I/O, corrupt record)
    StorageError = 2,
    UnknownCommand = 3,
    PayloadTooLarge = 4,
    /// Payload present where none is allowed, or not understood
    InvalidPayload = 5,
}

impl ResultCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a raw result, mapping unknown values to `None`
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ResultCode::Ok),
            1 => Some(ResultCode::NotFound),
            2 => Some(ResultCode::StorageError),
            3 => Some(ResultCode::UnknownCommand),
            4 => Some(ResultCode::PayloadTooLarge),
            5 => Some(ResultCode::InvalidPayload),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultCode::Ok => "ok",
            ResultCode::NotFound => "not found",
            ResultCode::StorageError => "storage error",
            ResultCode::UnknownCommand => "unknown command",
            ResultCode::PayloadTooLarge => "payload too large",
            ResultCode::InvalidPayload => "invalid payload",
        };
        f.write_str(name)
    }
}
