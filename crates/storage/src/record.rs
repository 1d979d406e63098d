//! On-disk record format for secure objects

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::StorageError;

/// Current record layout version
pub const RECORD_VERSION: u16 = 1;

/// Secure object as persisted: opaque blob plus integrity metadata
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct StoredObject {
    /// Record layout version
    pub version: u16,

    /// Declared blob size
    pub size: u32,

    /// CRC32 of the blob
    pub checksum: u32,

    /// Milliseconds since Unix epoch when the object was stored
    pub stored_at: u64,

    /// The secure object itself, never interpreted
    pub blob: Vec<u8>,
}

impl StoredObject {
    pub fn new(blob: Vec<u8>) -> Self {
        let stored_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            version: RECORD_VERSION,
            size: blob.len() as u32,
            checksum: crc32fast::hash(&blob),
            stored_at,
            blob,
        }
    }

    /// Check version, declared size and checksum
    pub fn verify(&self) -> Result<(), StorageError> {
        if self.version != RECORD_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported record version {}",
                self.version
            )));
        }
        if self.size as usize != self.blob.len() {
            return Err(StorageError::Corrupt(format!(
                "declared size {} but blob has {} bytes",
                self.size,
                self.blob.len()
            )));
        }
        let actual = crc32fast::hash(&self.blob);
        if actual != self.checksum {
            return Err(StorageError::Corrupt(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                self.checksum, actual
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// Decode and verify a record read from disk
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        // Archived fields need the buffer aligned
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let record = rkyv::from_bytes::<StoredObject, rkyv::rancor::Error>(&aligned)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        record.verify()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let record = StoredObject::new(b"ABCD1234".to_vec());
        assert_eq!(record.size, 8);

        let bytes = record.to_bytes().unwrap();
        let decoded = StoredObject::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_empty_record() {
        let record = StoredObject::new(Vec::new());
        let decoded = StoredObject::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.size, 0);
        assert!(decoded.blob.is_empty());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut record = StoredObject::new(vec![1, 2, 3]);
        record.checksum = 0xDEADBEEF;

        let bytes = record.to_bytes().unwrap();
        let err = StoredObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = StoredObject::new(vec![7u8; 256]).to_bytes().unwrap();
        let err = StoredObject::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }
}
