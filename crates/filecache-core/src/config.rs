//! Cache configuration
//!
//! File based loading lives in the `filecache` binary; this is the resolved
//! form the library works with.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::EvictionPolicy;

/// Default maximum total size (1 GiB)
pub const DEFAULT_MAX_SIZE: u64 = 1024 * 1024 * 1024;

/// Default maximum entry age (4 hours)
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Default sweep interval (5 minutes)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_BASE_DIR: &str = "filecache";

/// Configuration for the cache manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding one file per cache key
    pub base_dir: PathBuf,
    /// Scratch directory for in-flight writes; system temp dir when unset.
    /// Must be on the same filesystem as `base_dir`.
    pub staging_dir: Option<PathBuf>,
    /// Maximum total size in bytes
    pub max_size: u64,
    /// Maximum age since last access
    pub max_ttl: Duration,
    /// Interval between background sweeps
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            staging_dir: None,
            max_size: DEFAULT_MAX_SIZE,
            max_ttl: DEFAULT_MAX_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Replace zero or empty values with their defaults
    pub fn normalized(mut self) -> Self {
        if self.base_dir.as_os_str().is_empty() {
            self.base_dir = PathBuf::from(DEFAULT_BASE_DIR);
        }
        if self
            .staging_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            self.staging_dir = None;
        }
        if self.max_size == 0 {
            self.max_size = DEFAULT_MAX_SIZE;
        }
        if self.max_ttl.is_zero() {
            self.max_ttl = DEFAULT_MAX_TTL;
        }
        if self.cleanup_interval.is_zero() {
            self.cleanup_interval = DEFAULT_CLEANUP_INTERVAL;
        }
        self
    }

    /// Eviction limits derived from this configuration
    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_ttl: self.max_ttl,
            max_size: self.max_size,
        }
    }
}
