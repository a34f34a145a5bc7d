//! File Cache - disk-backed key/value cache with TTL and size eviction

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filecache_core::utils::format_bytes;
use filecache_core::{CacheManager, EvictionStrategy, LockGateway};
use filecache_storage::{ByteStream, StorageError};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;

/// File Cache - disk-backed key/value cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/filecache.toml")]
    config: String,

    /// Base directory holding cache entries
    #[arg(long, env = "FILECACHE_BASE_DIR")]
    base_dir: Option<String>,

    /// Staging directory for in-flight writes
    #[arg(long, env = "FILECACHE_STAGING_DIR")]
    staging_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new entry from a file or stdin
    Put {
        key: String,
        /// Read from this file instead of stdin
        file: Option<PathBuf>,
    },
    /// Write an entry to stdout
    Get { key: String },
    /// Delete an entry
    Rm { key: String },
    /// Exit with status 0 if the entry exists, 1 otherwise
    Has { key: String },
    /// List entries, least recently used first
    Ls,
    /// Print the total size of all entries
    Du,
    /// Remove all entries and the staging directory
    Clear,
    /// Run one eviction sweep
    Sweep {
        /// Only run one pass ("ttl" or "lru")
        #[arg(long)]
        strategy: Option<EvictionStrategy>,
    },
    /// Run periodic eviction until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(base_dir) = args.base_dir {
        config.cache.base_dir = base_dir;
    }
    if let Some(staging_dir) = args.staging_dir {
        config.cache.staging_dir = Some(staging_dir);
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    let cache = CacheManager::new(config.cache.to_core(), LockGateway::noop())
        .await
        .context("Failed to initialize cache")?;

    match args.command {
        Command::Put { key, file } => {
            let stream = match file {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("Failed to open {:?}", path))?;
                    reader_stream(file)
                }
                None => reader_stream(tokio::io::stdin()),
            };
            let written = cache.write(&key, stream).await?;
            info!("Stored {} ({})", key, format_bytes(written));
        }
        Command::Get { key } => {
            let mut stream = cache.read(&key).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
        Command::Rm { key } => {
            cache.delete(&key).await?;
            info!("Deleted {}", key);
        }
        Command::Has { key } => {
            if !cache.exists(&key).await? {
                std::process::exit(1);
            }
        }
        Command::Ls => {
            for entry in cache.list_entries().await? {
                println!(
                    "{}\t{}\t{}",
                    entry.last_access.to_rfc3339(),
                    entry.size,
                    entry.name
                );
            }
        }
        Command::Du => {
            println!("{}", format_bytes(cache.total_size().await?));
        }
        Command::Clear => {
            cache.clear().await?;
        }
        Command::Sweep { strategy } => {
            let report = match strategy {
                Some(strategy) => cache.run_strategy(strategy).await?,
                None => cache.run_eviction().await?,
            };
            println!(
                "expired: {}, evicted: {}, freed: {}",
                report.expired,
                report.evicted,
                format_bytes(report.freed_bytes)
            );
        }
        Command::Run => {
            info!("Starting File Cache v{}", env!("CARGO_PKG_VERSION"));
            cache.start_sweep()?;
            shutdown_signal().await;
            cache.shutdown().await;
            info!("Sweeper stopped");
        }
    }

    Ok(())
}

fn reader_stream<R>(reader: R) -> ByteStream
where
    R: tokio::io::AsyncRead + Send + 'static,
{
    Box::pin(tokio_util::io::ReaderStream::new(reader).map(|result| result.map_err(StorageError::Io)))
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is reserved for entry contents
    let (pretty, json) = if format == "json" {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}
