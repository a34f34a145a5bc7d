//! Eviction engine
//!
//! Every sweep runs the TTL pass and then the size pass against a fresh
//! listing of the store, holding the global lock for the whole sweep.

use chrono::{DateTime, Utc};
use filecache_storage::{CacheEntry, StorageBackend, StorageError};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::policy::{EvictionPolicy, EvictionStrategy};
use crate::error::{CoreError, LockError};
use crate::lock::LockGateway;
use crate::utils::format_bytes;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed by the TTL pass
    pub expired: u64,
    /// Entries removed by the size pass
    pub evicted: u64,
    /// Bytes released by both passes
    pub freed_bytes: u64,
}

impl EvictionReport {
    pub fn removed(&self) -> u64 {
        self.expired + self.evicted
    }
}

/// Applies an [`EvictionPolicy`] to a storage backend
pub struct EvictionEngine {
    storage: Arc<dyn StorageBackend>,
    locks: LockGateway,
    policy: EvictionPolicy,
}

impl EvictionEngine {
    pub fn new(storage: Arc<dyn StorageBackend>, locks: LockGateway, policy: EvictionPolicy) -> Self {
        Self {
            storage,
            locks,
            policy,
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Run the TTL pass followed by the size pass under the global lock
    pub async fn run(&self) -> Result<EvictionReport, CoreError> {
        info!("Start cleaning cached files");
        let _guard = self.locks.lock_global().await?;

        let mut report = EvictionReport::default();
        self.cleanup_expired(Utc::now(), &mut report).await?;
        self.enforce_size_limit(&mut report).await?;

        metrics::counter!("filecache_sweeps_total").increment(1);
        Ok(report)
    }

    /// Run a single pass under the global lock
    pub async fn run_strategy(&self, strategy: EvictionStrategy) -> Result<EvictionReport, CoreError> {
        let _guard = self.locks.lock_global().await?;

        let mut report = EvictionReport::default();
        match strategy {
            EvictionStrategy::Ttl => self.cleanup_expired(Utc::now(), &mut report).await?,
            EvictionStrategy::Lru => self.enforce_size_limit(&mut report).await?,
        }
        Ok(report)
    }

    /// Remove every entry last accessed more than `max_ttl` before `now`
    async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        report: &mut EvictionReport,
    ) -> Result<(), CoreError> {
        let strategy = EvictionStrategy::Ttl;
        let Some(entries) = self.snapshot(strategy).await else {
            return Ok(());
        };

        let mut count = 0u64;
        let mut freed = 0u64;
        for entry in &entries {
            // Timestamps in the future count as fresh
            let age = (now - entry.last_access).to_std().unwrap_or_default();
            if age <= self.policy.max_ttl {
                continue;
            }

            if self.evict_entry(entry, strategy).await? {
                count += 1;
                freed += entry.size;
            }
        }

        info!(strategy = strategy.as_str(), "Cleaned {} files", count);
        record_evictions(strategy, count, freed);
        report.expired += count;
        report.freed_bytes += freed;
        Ok(())
    }

    /// Remove least recently accessed entries until the store fits `max_size`.
    ///
    /// Stops at the first entry that brings the released size up to the
    /// excess, so the store may end up slightly below the limit.
    async fn enforce_size_limit(&self, report: &mut EvictionReport) -> Result<(), CoreError> {
        let strategy = EvictionStrategy::Lru;
        let current_size = match self.storage.total_size().await {
            Ok(size) => size,
            Err(e) => {
                listing_failed(strategy, &e);
                return Ok(());
            }
        };

        if current_size <= self.policy.max_size {
            return Ok(());
        }

        let excess = current_size - self.policy.max_size;
        info!(
            strategy = strategy.as_str(),
            "Cache size {} exceeds limit {}, freeing {} bytes",
            current_size,
            self.policy.max_size,
            excess
        );

        let Some(entries) = self.snapshot(strategy).await else {
            return Ok(());
        };

        let mut count = 0u64;
        let mut cleaned_size = 0u64;
        for entry in &entries {
            if !self.evict_entry(entry, strategy).await? {
                continue;
            }

            count += 1;
            cleaned_size += entry.size;
            if cleaned_size >= excess {
                break;
            }
        }

        info!(
            strategy = strategy.as_str(),
            "Cleaned {} cached files ({})",
            count,
            format_bytes(cleaned_size)
        );
        record_evictions(strategy, count, cleaned_size);
        report.evicted += count;
        report.freed_bytes += cleaned_size;
        Ok(())
    }

    /// Listing for one pass; `None` when the store cannot be enumerated
    async fn snapshot(&self, strategy: EvictionStrategy) -> Option<Vec<CacheEntry>> {
        match self.storage.list_entries().await {
            Ok(entries) => Some(entries),
            Err(e) => {
                listing_failed(strategy, &e);
                None
            }
        }
    }

    /// Delete one entry under its key lock.
    ///
    /// Returns `false` when the entry is skipped because a writer holds its
    /// lock or it disappeared since the listing was taken.
    async fn evict_entry(
        &self,
        entry: &CacheEntry,
        strategy: EvictionStrategy,
    ) -> Result<bool, CoreError> {
        let _guard = match self.locks.lock_key(&entry.name).await {
            Ok(guard) => guard,
            Err(LockError::Contention(_)) => {
                debug!(
                    strategy = strategy.as_str(),
                    "Skipping locked cache file {}", entry.name
                );
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        match self.storage.delete(&entry.name).await {
            Ok(()) => {
                debug!(
                    strategy = strategy.as_str(),
                    "Cleaned cache file {}", entry.name
                );
                Ok(true)
            }
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn listing_failed(strategy: EvictionStrategy, error: &StorageError) {
    warn!(
        strategy = strategy.as_str(),
        "Unable to enumerate cached files, skipping pass: {}", error
    );
    metrics::counter!("filecache_listing_failures_total", "strategy" => strategy.as_str())
        .increment(1);
}

fn record_evictions(strategy: EvictionStrategy, count: u64, bytes: u64) {
    metrics::counter!("filecache_evicted_entries_total", "strategy" => strategy.as_str())
        .increment(count);
    metrics::counter!("filecache_evicted_bytes_total", "strategy" => strategy.as_str())
        .increment(bytes);
}
