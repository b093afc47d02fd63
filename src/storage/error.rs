//! Block store error types
//!
//! Defines all errors that can occur while creating, appending to, or
//! reading block files.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the block store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data in {path:?}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// Block file format error
    #[error("Invalid block file: {0}")]
    InvalidBlock(String),

    /// Block file does not exist (deleted since it was listed)
    #[error("Block file not found: {0:?}")]
    NotFound(PathBuf),

    /// Caller passed malformed data or offsets
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Map an I/O error on `path` to `NotFound` when the file is gone.
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_path_buf())
        } else {
            StorageError::Io(err)
        }
    }

    /// True if the underlying file has disappeared.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for block store operations
pub type StorageResult<T> = Result<T, StorageError>;
