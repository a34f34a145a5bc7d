//! Configuration loading and management

use anyhow::{Context, Result};
use filecache_core::CacheConfig as CoreCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// Defaults to the system temp directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            staging_dir: None,
            max_size: default_max_size(),
            max_ttl_secs: default_max_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Convert into the library configuration
    pub fn to_core(&self) -> CoreCacheConfig {
        CoreCacheConfig {
            base_dir: PathBuf::from(&self.base_dir),
            staging_dir: self.staging_dir.as_ref().map(PathBuf::from),
            max_size: self.max_size,
            max_ttl: Duration::from_secs(self.max_ttl_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
        .normalized()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_base_dir() -> String {
    filecache_core::config::DEFAULT_BASE_DIR.to_string()
}

fn default_max_size() -> u64 {
    filecache_core::config::DEFAULT_MAX_SIZE
}

fn default_max_ttl_secs() -> u64 {
    filecache_core::config::DEFAULT_MAX_TTL.as_secs()
}

fn default_cleanup_interval_secs() -> u64 {
    filecache_core::config::DEFAULT_CLEANUP_INTERVAL.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file, falling back to defaults if it is missing
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
