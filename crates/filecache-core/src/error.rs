//! Core error types

use filecache_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Sweep scheduler has been stopped")]
    Cancelled,
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Storage(StorageError::NotFound(_)))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CoreError::Storage(StorageError::AlreadyExists(_)))
    }

    pub fn is_lock_contention(&self) -> bool {
        matches!(self, CoreError::Lock(LockError::Contention(_)))
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock already held: {0}")]
    Contention(String),

    #[error("Lock provider error: {0}")]
    Provider(String),
}
