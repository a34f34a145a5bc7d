//! File Cache Core Logic
//!
//! This crate provides the consistency and eviction engine for the file cache:
//! lock-guarded mutations, TTL and size based eviction, and the background
//! sweep scheduler.

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod utils;

pub use cache::{
    CacheManager, EvictionEngine, EvictionPolicy, EvictionReport, EvictionStrategy,
    SweepScheduler, SweepState,
};
pub use config::CacheConfig;
pub use error::{CoreError, LockError};
pub use lock::{
    GLOBAL_LOCK_KEY, InMemoryLockProvider, Lock, LockGateway, LockGuard, LockProvider,
    NoopLockProvider, key_lock_name,
};
