//! Local disk storage backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::backend::{ByteStream, CacheEntry, StorageBackend, validate_key};
use crate::error::StorageError;
use crate::listing;

/// Name prefix of in-flight files in the staging directory
pub const STAGING_PREFIX: &str = "filecachetmp-";

#[cfg(unix)]
const DIR_MODE: u32 = 0o777;

/// Local disk storage backend
///
/// Stores one regular file per key, named verbatim after the key:
/// `<base_path>/<key>`
///
/// Writes are streamed into `<staging_path>/filecachetmp-*` and renamed into
/// place once synced, so the staging directory must live on the same
/// filesystem as the base directory.
pub struct LocalStorage {
    base_path: PathBuf,
    staging_path: PathBuf,
    /// Staging area is the system temp dir, shared with other programs
    shared_staging: bool,
}

impl LocalStorage {
    /// Create a new local storage backend
    ///
    /// Without a staging path the system temp directory is used. The staging
    /// directory may not be the base directory or one of its descendants.
    pub async fn new(
        base_path: impl AsRef<Path>,
        staging_path: Option<PathBuf>,
    ) -> Result<Self, StorageError> {
        let base_path = ensure_dir(base_path.as_ref()).await?;
        let system_temp = fs::canonicalize(std::env::temp_dir()).await?;
        let staging_path = match staging_path {
            Some(path) => ensure_dir(&path).await?,
            None => system_temp.clone(),
        };
        if staging_path.starts_with(&base_path) {
            return Err(StorageError::Configuration(format!(
                "staging directory {:?} must not be inside the base directory {:?}",
                staging_path, base_path
            )));
        }
        let shared_staging = staging_path == system_temp;

        info!(
            "Initialized local storage at {:?} (staging: {:?})",
            base_path, staging_path
        );

        Ok(Self {
            base_path,
            staging_path,
            shared_staging,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Get the file path for a key
    pub fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    /// Fail with `NotFound` unless `path` is a regular file
    async fn check_file(&self, key: &str, path: &Path) -> Result<(), StorageError> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    /// Recreate the directory layout, which `clear` tears down
    async fn ensure_layout(&self) -> Result<(), StorageError> {
        ensure_dir(&self.base_path).await?;
        ensure_dir(&self.staging_path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(key)?;
        match self.check_file(key, &path).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.entry_path(key)?;
        self.check_file(key, &path).await?;
        debug!("Reading entry from {:?}", path);

        self.touch(key, Utc::now()).await?;

        let file = File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;

        let reader = BufReader::new(file);
        let stream = tokio_util::io::ReaderStream::new(reader);

        Ok(Box::pin(stream.map(|result| {
            result.map_err(StorageError::Io)
        })))
    }

    async fn write(&self, key: &str, mut stream: ByteStream) -> Result<u64, StorageError> {
        let path = self.entry_path(key)?;
        if self.exists(key).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        self.ensure_layout().await?;

        // The temp path removes the staging file when dropped, which covers
        // every early return below.
        let staging = self.staging_path.clone();
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(staging)
        })
        .await
        .map_err(join_error)??;
        let (std_file, temp_path) = temp.into_parts();
        debug!("Writing entry {} via {:?}", key, temp_path);

        let mut file = File::from_std(std_file);
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // Commit with a no-clobber rename so a concurrent writer that won the
        // race is never overwritten.
        let target = path.clone();
        let committed = tokio::task::spawn_blocking(move || temp_path.persist_noclobber(&target))
            .await
            .map_err(join_error)?;

        match committed {
            Ok(()) => {
                debug!("Committed entry {} ({} bytes) to {:?}", key, written, path);
                Ok(written)
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e.error)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        self.check_file(key, &path).await?;
        debug!("Deleting entry at {:?}", path);

        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))
    }

    async fn touch(&self, key: &str, timestamp: DateTime<Utc>) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        self.check_file(key, &path).await?;
        let time = SystemTime::from(timestamp);

        // Setting times only needs ownership, so a read-only handle will do
        let result = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path)?;
            file.set_times(FileTimes::new().set_accessed(time).set_modified(time))
        })
        .await
        .map_err(join_error)?;

        result.map_err(|e| StorageError::from_io(key, e))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        info!("Clearing storage at {:?}", self.base_path);

        if self.shared_staging {
            remove_staging_files(&self.staging_path).await?;
        } else {
            remove_dir_if_exists(&self.staging_path).await?;
        }
        remove_dir_if_exists(&self.base_path).await?;

        Ok(())
    }

    async fn total_size(&self) -> Result<u64, StorageError> {
        listing::dir_size(&self.base_path).await
    }

    async fn list_entries(&self) -> Result<Vec<CacheEntry>, StorageError> {
        listing::list_entries(&self.base_path).await
    }
}

/// Create a directory (and parents) and return its absolute path
async fn ensure_dir(dir: &Path) -> Result<PathBuf, StorageError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(dir).await?;

    Ok(fs::canonicalize(dir).await?)
}

async fn remove_dir_if_exists(dir: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Remove only our own in-flight files from a shared staging directory
async fn remove_staging_files(dir: &Path) -> Result<(), StorageError> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::Io(e)),
    };

    while let Some(dir_entry) = read_dir.next_entry().await? {
        let is_staging_file = dir_entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(STAGING_PREFIX));
        if !is_staging_file {
            continue;
        }

        match fs::remove_file(dir_entry.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
    }

    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Io(std::io::Error::other(e))
}
