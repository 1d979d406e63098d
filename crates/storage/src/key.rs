//! Identity keys scoping registry entries

use serde::Deserialize;
use std::fmt;

use crate::StorageError;

const MAX_KEY_LEN: usize = 64;

/// How callers map onto registry entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityScope {
    /// One entry per calling uid
    #[default]
    Caller,
    /// A single device-wide entry shared by every caller
    Device,
}

/// Directory-safe name of one registry entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Validate an explicit key name
    pub fn new(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_KEY_LEN
            && !name.starts_with('.')
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');

        if valid {
            Ok(Self(name))
        } else {
            Err(StorageError::InvalidKey(name))
        }
    }

    pub fn for_uid(uid: u32) -> Self {
        Self(format!("uid-{}", uid))
    }

    pub fn device() -> Self {
        Self("device".to_string())
    }

    /// Key for a caller authenticated by socket credentials
    pub fn resolve(scope: IdentityScope, uid: u32) -> Self {
        match scope {
            IdentityScope::Caller => Self::for_uid(uid),
            IdentityScope::Device => Self::device(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
