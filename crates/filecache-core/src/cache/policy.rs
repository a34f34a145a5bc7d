//! Cache eviction policies

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Error type for parsing eviction strategy
#[derive(Debug, Clone)]
pub struct ParseEvictionStrategyError(String);

impl fmt::Display for ParseEvictionStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid eviction strategy: {}", self.0)
    }
}

impl std::error::Error for ParseEvictionStrategyError {}

/// Limits enforced by every sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Entries not accessed for longer than this are expired
    pub max_ttl: Duration,
    /// Total size the cache is trimmed back to
    pub max_size: u64,
}

/// One eviction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionStrategy {
    /// Time to live - remove entries whose last access is older than the max age
    Ttl,
    /// Least Recently Used - remove oldest accessed entries until under the size limit
    Lru,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStrategy::Ttl => "ttl",
            EvictionStrategy::Lru => "lru",
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionStrategy {
    type Err = ParseEvictionStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ttl" => Ok(EvictionStrategy::Ttl),
            "lru" | "size" => Ok(EvictionStrategy::Lru),
            _ => Err(ParseEvictionStrategyError(s.to_string())),
        }
    }
}
