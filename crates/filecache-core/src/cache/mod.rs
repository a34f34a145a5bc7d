//! Cache management module

mod eviction;
mod manager;
mod policy;
mod scheduler;

pub use eviction::{EvictionEngine, EvictionReport};
pub use manager::CacheManager;
pub use policy::{EvictionPolicy, EvictionStrategy, ParseEvictionStrategyError};
pub use scheduler::{SweepScheduler, SweepState};
