//! teebroker Protocol - Frame headers and sequencing
//!
//! This crate defines the wire vocabulary shared by the daemon and its
//! clients:
//! - `CommandHeader`/`ResponseHeader`: fixed 12-byte little-endian headers
//! - `Command`/`ResultCode`: registry operations and their outcomes
//! - `SequenceTracker`: command/response pairing and desync detection
//!
//! Headers are encoded field by field; no in-memory layout is relied upon.

mod command;
mod frame;
mod sequence;
mod validation;

pub use command::*;
pub use frame::*;
pub use sequence::*;
pub use validation::*;
