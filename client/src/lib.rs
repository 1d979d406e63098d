//! teebroker Client Library
//!
//! Talks to `teebrokerd` over its local socket to store, read and delete
//! the caller's auth token.

pub mod config;
mod registry;

pub use config::ClientConfig;
pub use registry::*;
