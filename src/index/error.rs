//! Index error types
//!
//! Defines all error conditions that can occur while indexing channels and
//! reading samples, plus the internal stale-index signal.

use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Unsupported root, attribute mismatch, or other misconfiguration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sample ranges overlap across roots, subdirectories, or files
    #[error("Overlap error: {0}")]
    Overlap(String),

    /// Index still lacked detail after one refresh and retry
    #[error("Index still stale after refresh: {0}")]
    StaleIndex(String),

    /// Requested range is not covered by one continuous block
    #[error("Gap in data: {0}")]
    Gap(String),

    /// An indexed file has disappeared
    #[error("Data missing: {0:?}")]
    MissingData(PathBuf),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Channel name is not known to the catalog
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel has no committed data yet
    #[error("No data in channel: {0}")]
    NoData(String),

    /// No metadata file applies to the request
    #[error("No metadata file: {0}")]
    MissingMetadata(String),

    /// Block store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error outside the block store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task failed to complete
    #[error("Task error: {0}")]
    Task(String),
}

impl IndexError {
    /// Convert a storage error from reading `path`, mapping a vanished file
    /// to `MissingData`
    pub fn from_storage(path: &std::path::Path, err: StorageError) -> Self {
        if err.is_not_found() {
            IndexError::MissingData(path.to_path_buf())
        } else {
            IndexError::Storage(err)
        }
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Outcome of a read against cached index state.
///
/// `Stale` means a cached summary row lacks the detail needed to answer;
/// the caller refreshes the affected scope and retries once.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Fetch<T> {
    Ready(T),
    Stale,
}

impl<T> Fetch<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Fetch::Stale)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Fetch::Ready(value) => Some(value),
            Fetch::Stale => None,
        }
    }
}

/// Unwrap a `Fetch::Ready` or return `Ok(Fetch::Stale)` from the enclosing function
macro_rules! ready {
    ($fetch:expr) => {
        match $fetch {
            $crate::index::error::Fetch::Ready(value) => value,
            $crate::index::error::Fetch::Stale => {
                return Ok($crate::index::error::Fetch::Stale)
            }
        }
    };
}

pub(crate) use ready;
