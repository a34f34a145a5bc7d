//! Directory listing helpers
//!
//! The base directory is the only record of what is cached, so every listing
//! is a fresh snapshot of the filesystem.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::backend::CacheEntry;
use crate::error::StorageError;

/// List the regular files directly under `dir`, oldest last access first.
///
/// Entries with equal timestamps are ordered by name so that repeated
/// listings of an unchanged directory are identical. A missing directory
/// lists as empty.
pub async fn list_entries(dir: &Path) -> Result<Vec<CacheEntry>, StorageError> {
    let mut entries = Vec::new();
    let Some(mut read_dir) = open_dir(dir).await? else {
        return Ok(entries);
    };

    while let Some(dir_entry) = read_dir.next_entry().await? {
        let metadata = match dir_entry.metadata().await {
            Ok(m) => m,
            // Removed between readdir and stat
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(StorageError::Io(e)),
        };

        if !metadata.is_file() {
            debug!("Skipping non-file entry {:?}", dir_entry.path());
            continue;
        }

        let name = match dir_entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                debug!("Skipping entry with non UTF-8 name {:?}", raw);
                continue;
            }
        };

        entries.push(CacheEntry {
            name,
            size: metadata.len(),
            last_access: DateTime::<Utc>::from(metadata.modified()?),
        });
    }

    sort_by_last_access(&mut entries);
    Ok(entries)
}

/// Stable sort, ascending by last access, ties broken by name
pub fn sort_by_last_access(entries: &mut [CacheEntry]) {
    entries.sort_by(|a, b| {
        a.last_access
            .cmp(&b.last_access)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Sum the sizes of all regular files below `root`, recursively.
/// A missing root counts as empty.
pub async fn dir_size(root: &Path) -> Result<u64, StorageError> {
    let mut total = 0u64;
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Some(mut read_dir) = open_dir(&dir).await? else {
            continue;
        };
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let file_type = dir_entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(dir_entry.path());
            } else if file_type.is_file() {
                match dir_entry.metadata().await {
                    Ok(metadata) => total += metadata.len(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::Io(e)),
                }
            }
        }
    }

    Ok(total)
}

/// `read_dir` that maps a missing directory to `None`
async fn open_dir(dir: &Path) -> Result<Option<fs::ReadDir>, StorageError> {
    match fs::read_dir(dir).await {
        Ok(read_dir) => Ok(Some(read_dir)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry(name: &str, secs_ago: i64, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            name: name.to_string(),
            size: 1,
            last_access: now - Duration::seconds(secs_ago),
        }
    }

    #[test]
    fn test_sort_by_last_access() {
        let now = Utc::now();
        let mut entries = vec![
            entry("c", 10, now),
            entry("a", 30, now),
            entry("b", 20, now),
        ];
        sort_by_last_access(&mut entries);

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_ties_broken_by_name() {
        let now = Utc::now();
        let mut entries = vec![entry("z", 5, now), entry("m", 5, now), entry("a", 5, now)];
        sort_by_last_access(&mut entries);

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }

    #[tokio::test]
    async fn test_list_entries_empty_dir() {
        let dir = TempDir::new().unwrap();
        let entries = list_entries(dir.path()).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");

        assert!(list_entries(&missing).await.unwrap().is_empty());
        assert_eq!(dir_size(&missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("file");
        fs::write(&not_a_dir, b"abc").await.unwrap();

        assert!(matches!(
            list_entries(&not_a_dir).await,
            Err(StorageError::Io(_))
        ));
        assert!(matches!(dir_size(&not_a_dir).await, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_list_entries_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), b"abc").await.unwrap();
        fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let entries = list_entries(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "file");
        assert_eq!(entries[0].size, 3);
    }

    #[tokio::test]
    async fn test_dir_size_is_recursive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), b"12345").await.unwrap();
        fs::create_dir(dir.path().join("nested")).await.unwrap();
        fs::write(dir.path().join("nested").join("b"), b"123")
            .await
            .unwrap();

        assert_eq!(dir_size(dir.path()).await.unwrap(), 8);
    }
}
