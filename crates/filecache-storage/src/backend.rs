//! Storage backend trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

use crate::error::StorageError;

/// Type alias for a boxed stream of bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// A committed cache entry as seen on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key, identical to the file name under the base directory
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last access time (file modification time)
    pub last_access: DateTime<Utc>,
}

/// Storage backend trait
///
/// Implementations map each key to exactly one committed object. Partially
/// written objects must never be visible through any of these operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Check if an entry exists and is a regular file
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Open an entry for streaming, bumping its last access time first
    async fn read(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// Write a new entry from a stream. Fails with `AlreadyExists` instead of
    /// overwriting an existing entry.
    async fn write(&self, key: &str, stream: ByteStream) -> Result<u64, StorageError>;

    /// Delete an entry
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Set the last access time of an entry
    async fn touch(&self, key: &str, timestamp: DateTime<Utc>) -> Result<(), StorageError>;

    /// Remove every entry together with the staging area
    async fn clear(&self) -> Result<(), StorageError>;

    /// Sum of the sizes of all regular files in the store
    async fn total_size(&self) -> Result<u64, StorageError>;

    /// All entries, oldest last access first
    async fn list_entries(&self) -> Result<Vec<CacheEntry>, StorageError>;
}

/// Check that a key can be used verbatim as a single directory entry name
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key is empty".to_string()));
    }
    if key == "." || key == ".." {
        return Err(StorageError::InvalidKey(format!(
            "reserved name: {}",
            key
        )));
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidKey(format!(
            "key contains a path separator or NUL: {:?}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("key").is_ok());
        assert!(validate_key("sha256-abc.tar.gz").is_ok());
        assert!(validate_key(".hidden").is_ok());

        assert!(matches!(validate_key(""), Err(StorageError::InvalidKey(_))));
        assert!(matches!(validate_key("."), Err(StorageError::InvalidKey(_))));
        assert!(matches!(validate_key(".."), Err(StorageError::InvalidKey(_))));
        assert!(matches!(validate_key("a/b"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(validate_key("a\\b"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(validate_key("a\0b"), Err(StorageError::InvalidKey(_))));
    }
}
