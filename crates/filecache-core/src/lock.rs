//! Lock gateway
//!
//! Mutations are serialized through an injectable lock provider keyed by
//! string. Single keys use `lock_filecache_<key>`; whole-store operations and
//! sweeps use the global `lock_filecache` key. Providers must fail fast with
//! [`LockError::Contention`] instead of waiting for a held lock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::error::LockError;

/// Lock key for whole-store operations and sweeps
pub const GLOBAL_LOCK_KEY: &str = "lock_filecache";

/// Lock key guarding mutations of a single cache key
pub fn key_lock_name(key: &str) -> String {
    format!("{}_{}", GLOBAL_LOCK_KEY, key)
}

/// A lock held on behalf of one operation
pub trait Lock: Send {
    /// Release the lock. Consumes the lock so it can only happen once.
    fn release(self: Box<Self>);
}

/// Mutual exclusion service keyed by string
///
/// Implementations may be process-local or backed by a shared service so that
/// several processes can operate on the same cache directory.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire the lock for `key`, failing with `Contention` if it is held
    async fn acquire(&self, key: &str) -> Result<Box<dyn Lock>, LockError>;
}

/// RAII guard releasing its lock exactly once, on drop at the latest
pub struct LockGuard {
    key: String,
    lock: Option<Box<dyn Lock>>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release now instead of at end of scope
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(lock) = self.lock.take() {
            trace!("Releasing lock {}", self.key);
            lock.release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Provider for single-process use where no locking is wanted
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockProvider;

struct NoopLock;

impl Lock for NoopLock {
    fn release(self: Box<Self>) {}
}

#[async_trait]
impl LockProvider for NoopLockProvider {
    async fn acquire(&self, _key: &str) -> Result<Box<dyn Lock>, LockError> {
        Ok(Box::new(NoopLock))
    }
}

/// Process-local provider backed by a set of held keys
#[derive(Debug, Default, Clone)]
pub struct InMemoryLockProvider {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

struct InMemoryLock {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Lock for InMemoryLock {
    fn release(self: Box<Self>) {
        self.held.lock().remove(&self.key);
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn acquire(&self, key: &str) -> Result<Box<dyn Lock>, LockError> {
        let mut held = self.held.lock();
        if !held.insert(key.to_string()) {
            return Err(LockError::Contention(key.to_string()));
        }

        Ok(Box::new(InMemoryLock {
            key: key.to_string(),
            held: self.held.clone(),
        }))
    }
}

/// Entry point for all locking done by the cache
#[derive(Clone)]
pub struct LockGateway {
    provider: Arc<dyn LockProvider>,
}

impl LockGateway {
    pub fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self { provider }
    }

    /// Gateway that never blocks anything
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopLockProvider))
    }

    /// Acquire an arbitrary lock key
    pub async fn acquire(&self, lock_key: &str) -> Result<LockGuard, LockError> {
        let lock = self.provider.acquire(lock_key).await?;
        trace!("Acquired lock {}", lock_key);

        Ok(LockGuard {
            key: lock_key.to_string(),
            lock: Some(lock),
        })
    }

    /// Lock a single cache key
    pub async fn lock_key(&self, key: &str) -> Result<LockGuard, LockError> {
        self.acquire(&key_lock_name(key)).await
    }

    /// Lock the whole store
    pub async fn lock_global(&self) -> Result<LockGuard, LockError> {
        self.acquire(GLOBAL_LOCK_KEY).await
    }
}

impl Default for LockGateway {
    fn default() -> Self {
        Self::noop()
    }
}

impl From<Arc<dyn LockProvider>> for LockGateway {
    fn from(provider: Arc<dyn LockProvider>) -> Self {
        Self::new(provider)
    }
}
