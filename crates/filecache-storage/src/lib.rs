//! File Cache Storage Layer
//!
//! This crate provides the filesystem side of the cache: one regular file per
//! key under a base directory, atomic create-only writes through a staging
//! directory, and access-time ordered listings used by eviction.

pub mod backend;
pub mod error;
pub mod listing;
pub mod local;

pub use backend::{ByteStream, CacheEntry, StorageBackend, validate_key};
pub use error::StorageError;
pub use local::{LocalStorage, STAGING_PREFIX};
