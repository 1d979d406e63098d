//! Secure-object registry keyed by caller identity

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{IdentityKey, StoredObject};

/// File name of the auth-token entry inside an identity directory
pub const AUTH_TOKEN_FILE: &str = "auth_token.so";

const TEMP_PREFIX: &str = ".auth_token.";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No entry for identity {0}")]
    NotFound(IdentityKey),

    #[error("Object too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid identity key: {0:?}")]
    InvalidKey(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Absent entries are a normal outcome, everything else is a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Largest secure object accepted by `store`
    pub max_object_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_object_size: 64 * 1024,
        }
    }
}

/// A stored secure object, returned by value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureObject(Vec<u8>);

impl SecureObject {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Persistent registry of auth-token secure objects
///
/// Layout: `<root>/<identity>/auth_token.so`. Stores go through a temporary
/// file in the same directory and an atomic rename, so a reader sees either
/// the previous complete record or the new one. Operations on one identity are
/// serialized by a per-key lock; different identities never contend.
pub struct Registry {
    root: PathBuf,
    config: RegistryConfig,
    locks: DashMap<IdentityKey, Arc<Mutex<()>>>,
}

impl Registry {
    /// Open (or create) a registry rooted at `root`
    ///
    /// Temporary files left by interrupted stores are removed.
    pub fn open(root: impl AsRef<Path>, config: RegistryConfig) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700))?;

        let registry = Self {
            root,
            config,
            locks: DashMap::new(),
        };

        let swept = registry.sweep_temporaries()?;
        if swept > 0 {
            warn!("Removed {} incomplete records from {}", swept, registry.root.display());
        }
        info!("Registry opened at {}", registry.root.display());

        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Store (or atomically replace) the entry for `key`
    pub fn store(&self, key: &IdentityKey, blob: &[u8]) -> Result<(), StorageError> {
        if blob.len() > self.config.max_object_size {
            return Err(StorageError::TooLarge {
                size: blob.len(),
                max: self.config.max_object_size,
            });
        }

        let record = StoredObject::new(blob.to_vec()).to_bytes()?;

        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let dir = self.entry_dir(key);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&dir)?;
        tmp.write_all(&record)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(AUTH_TOKEN_FILE))
            .map_err(|e| StorageError::Io(e.error))?;
        sync_dir(&dir)?;

        debug!("Stored {} byte object for {}", blob.len(), key);
        Ok(())
    }

    /// Read the complete entry for `key`
    pub fn read(&self, key: &IdentityKey) -> Result<SecureObject, StorageError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let record = self.load(key)?;
        debug!(
            "Read {} byte object for {} (stored at {})",
            record.blob.len(),
            key,
            record.stored_at
        );
        Ok(SecureObject(record.blob))
    }

    /// Remove the entry for `key`
    pub fn delete(&self, key: &IdentityKey) -> Result<(), StorageError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let dir = self.entry_dir(key);
        match fs::remove_file(dir.join(AUTH_TOKEN_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        sync_dir(&dir)?;

        debug!("Deleted object for {}", key);
        Ok(())
    }

    pub fn exists(&self, key: &IdentityKey) -> bool {
        self.entry_dir(key).join(AUTH_TOKEN_FILE).is_file()
    }

    fn load(&self, key: &IdentityKey) -> Result<StoredObject, StorageError> {
        let path = self.entry_dir(key).join(AUTH_TOKEN_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        StoredObject::from_bytes(&bytes)
    }

    fn entry_dir(&self, key: &IdentityKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn lock_for(&self, key: &IdentityKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn sweep_temporaries(&self) -> Result<usize, StorageError> {
        let mut swept = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let name = file.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                    fs::remove_file(file.path())?;
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
