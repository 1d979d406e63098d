//! teebroker Storage - secure-object registry
//!
//! This crate provides:
//! - `Registry`: store/read/delete of auth-token secure objects
//! - `IdentityKey`/`IdentityScope`: per-caller or device-wide entries
//! - `StoredObject`: checksummed on-disk record (rkyv)
//!
//! Writes are atomic with respect to crashes (temp file, fsync, rename).

mod key;
mod record;
mod registry;

pub use key::*;
pub use record::*;
pub use registry::*;
