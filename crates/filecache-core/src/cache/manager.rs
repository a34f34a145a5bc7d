//! Cache manager implementation

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use filecache_storage::{ByteStream, CacheEntry, LocalStorage, StorageBackend, StorageError};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

use super::eviction::{EvictionEngine, EvictionReport};
use super::policy::EvictionStrategy;
use super::scheduler::{SweepScheduler, SweepState};
use crate::config::CacheConfig;
use crate::error::CoreError;
use crate::lock::LockGateway;

/// Public surface of the file cache
///
/// Writes and deletes take the per-key lock, `clear` and sweeps take the
/// global lock. Reads are never locked; they rely on commits being atomic
/// renames.
pub struct CacheManager {
    storage: Arc<dyn StorageBackend>,
    locks: LockGateway,
    engine: Arc<EvictionEngine>,
    scheduler: SweepScheduler,
    config: CacheConfig,
}

impl CacheManager {
    /// Create a cache manager on local disk, creating its directories
    pub async fn new(config: CacheConfig, locks: LockGateway) -> Result<Self, CoreError> {
        let config = config.normalized();
        let storage = LocalStorage::new(&config.base_dir, config.staging_dir.clone()).await?;
        Ok(Self::with_storage(Arc::new(storage), config, locks))
    }

    /// Create a cache manager over an existing storage backend
    pub fn with_storage(
        storage: Arc<dyn StorageBackend>,
        config: CacheConfig,
        locks: LockGateway,
    ) -> Self {
        let config = config.normalized();
        info!(
            "Initializing cache manager (max_size: {} bytes, max_ttl: {:?}, interval: {:?})",
            config.max_size, config.max_ttl, config.cleanup_interval
        );

        let engine = Arc::new(EvictionEngine::new(
            storage.clone(),
            locks.clone(),
            config.policy(),
        ));
        let scheduler = SweepScheduler::new(engine.clone(), config.cleanup_interval);

        Self {
            storage,
            locks,
            engine,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store a new entry from a stream. Existing entries are never overwritten.
    pub async fn write(&self, key: &str, stream: ByteStream) -> Result<u64, CoreError> {
        let _guard = self.locks.lock_key(key).await?;
        let written = self.storage.write(key, stream).await?;
        debug!("Cached entry {} ({} bytes)", key, written);
        Ok(written)
    }

    /// Store a new entry from an in-memory buffer
    pub async fn write_bytes(&self, key: &str, data: Bytes) -> Result<u64, CoreError> {
        let chunks: Vec<Result<Bytes, StorageError>> = vec![Ok(data)];
        self.write(key, Box::pin(futures::stream::iter(chunks))).await
    }

    /// Open an entry for streaming; marks it as recently used
    pub async fn read(&self, key: &str) -> Result<ByteStream, CoreError> {
        Ok(self.storage.read(key).await?)
    }

    /// Read an entry fully into memory
    pub async fn read_bytes(&self, key: &str) -> Result<Bytes, CoreError> {
        let mut stream = self.read(key).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.storage.exists(key).await?)
    }

    /// Delete an entry
    pub async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let _guard = self.locks.lock_key(key).await?;
        debug!("Deleting cache entry: {}", key);
        self.storage.delete(key).await?;
        Ok(())
    }

    /// Set an entry's last access time
    pub async fn touch(&self, key: &str, timestamp: DateTime<Utc>) -> Result<(), CoreError> {
        Ok(self.storage.touch(key, timestamp).await?)
    }

    /// Remove every entry along with the staging area
    pub async fn clear(&self) -> Result<(), CoreError> {
        let _guard = self.locks.lock_global().await?;
        info!("Clearing all cache entries");
        self.storage.clear().await?;
        Ok(())
    }

    /// Entries ordered by last access, oldest first
    pub async fn list_entries(&self) -> Result<Vec<CacheEntry>, CoreError> {
        Ok(self.storage.list_entries().await?)
    }

    pub async fn total_size(&self) -> Result<u64, CoreError> {
        Ok(self.storage.total_size().await?)
    }

    /// Run TTL and size eviction now, propagating any failure
    pub async fn run_eviction(&self) -> Result<EvictionReport, CoreError> {
        self.engine.run().await
    }

    /// Run a single eviction pass now
    pub async fn run_strategy(&self, strategy: EvictionStrategy) -> Result<EvictionReport, CoreError> {
        self.engine.run_strategy(strategy).await
    }

    /// Start periodic eviction in the background
    pub fn start_sweep(&self) -> Result<(), CoreError> {
        self.scheduler.start()
    }

    /// Stop periodic eviction; safe to call any number of times
    pub fn stop_sweep(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn sweep_state(&self) -> SweepState {
        self.scheduler.state()
    }

    /// Stop periodic eviction and wait for a running sweep to finish
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
