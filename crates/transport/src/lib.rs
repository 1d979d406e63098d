//! teebroker Transport - local socket layer
//!
//! This crate provides:
//! - `Endpoint`: filesystem or abstract-namespace socket addresses
//! - `Connection`: single-owner stream socket with timeout-bounded reads
//! - `FrameCodec`: header + payload exchange on top of a connection

mod connection;
mod endpoint;
mod frame_codec;

pub use connection::*;
pub use endpoint::*;
pub use frame_codec::*;
