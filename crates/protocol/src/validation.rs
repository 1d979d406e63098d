//! Header validation utilities

use crate::command::{Command, ResultCode};
use crate::frame::{CommandHeader, ResponseHeader};
use thiserror::Error;

/// Validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown command code {0}")]
    UnknownCommand(u32),

    #[error("Unknown result code {0}")]
    UnknownResult(u32),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{command} does not take a payload ({size} bytes sent)")]
    UnexpectedPayload { command: &'static str, size: usize },
}

impl ValidationError {
    /// Result code the daemon answers with for this rejection
    pub fn result_code(&self) -> ResultCode {
        match self {
            ValidationError::UnknownCommand(_) => ResultCode::UnknownCommand,
            ValidationError::PayloadTooLarge { .. } => ResultCode::PayloadTooLarge,
            ValidationError::UnknownResult(_) | ValidationError::UnexpectedPayload { .. } => {
                ResultCode::InvalidPayload
            }
        }
    }
}

/// Maximum allowed payload size (64KB)
pub const MAX_PAYLOAD_SIZE: usize = 65536;

/// Check a declared payload length against a limit
pub fn check_payload_size(size: u32, max: usize) -> Result<usize, ValidationError> {
    let size = size as usize;
    if size > max {
        return Err(ValidationError::PayloadTooLarge { size, max });
    }
    Ok(size)
}

/// Validate a command header and resolve its command code
pub fn validate_command(header: &CommandHeader, max: usize) -> Result<Command, ValidationError> {
    check_payload_size(header.data_size, max)?;

    let command =
        Command::try_from(header.cmd).map_err(|e| ValidationError::UnknownCommand(e.0))?;

    match (command.accepts_payload(), header.data_size) {
        (false, size) if size > 0 => Err(ValidationError::UnexpectedPayload {
            command: command.name(),
            size: size as usize,
        }),
        _ => Ok(command),
    }
}

/// Validate a response header and resolve its result code
pub fn validate_response(
    header: &ResponseHeader,
    max: usize,
) -> Result<ResultCode, ValidationError> {
    check_payload_size(header.data_size, max)?;
    ResultCode::from_code(header.result).ok_or(ValidationError::UnknownResult(header.result))
}
