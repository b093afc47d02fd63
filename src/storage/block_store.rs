//! Block store abstraction
//!
//! The index only ever talks to storage through `BlockStore`. The shipped
//! implementation, `FileBlockStore`, reads and writes the local block file
//! format in `block_file`.

use crate::storage::block_file::{read_header, BlockFileReader, BlockFileWriter};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlockAttributes, BlockIndex};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Default window after the last modification during which an unsealed file
/// is considered still being written
pub const DEFAULT_OPEN_FILE_WINDOW: Duration = Duration::from_secs(3);

/// Write handle for one block file
pub trait BlockWriter {
    /// Append packed samples starting at global sample `at_sample`
    fn append(&mut self, samples: &[u8], at_sample: u64) -> StorageResult<()>;

    /// Free capacity in samples
    fn remaining(&self) -> u64;

    /// Seal the file
    fn close(self) -> StorageResult<()>;
}

/// Persists fixed-capacity sample blocks with a per-file sparse index
pub trait BlockStore {
    type Writer: BlockWriter;

    fn create(&self, path: &Path, attrs: &BlockAttributes) -> StorageResult<Self::Writer>;

    /// Copy `len` samples starting at in-file position `offset`
    fn read_range(&self, path: &Path, offset: u64, len: u64) -> StorageResult<Vec<u8>>;

    fn read_attrs(&self, path: &Path) -> StorageResult<BlockAttributes>;

    fn read_sample_index(&self, path: &Path) -> StorageResult<BlockIndex>;

    fn exists(&self, path: &Path) -> bool;

    fn mtime(&self, path: &Path) -> StorageResult<SystemTime>;

    /// True if a writer may still be appending to `path`
    fn is_plausibly_open(&self, path: &Path) -> bool;
}

impl BlockWriter for BlockFileWriter {
    fn append(&mut self, samples: &[u8], at_sample: u64) -> StorageResult<()> {
        BlockFileWriter::append(self, samples, at_sample)
    }

    fn remaining(&self) -> u64 {
        BlockFileWriter::remaining(self)
    }

    fn close(self) -> StorageResult<()> {
        BlockFileWriter::close(self)
    }
}

/// Block store over local block files
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    open_file_window: Duration,
}

impl Default for FileBlockStore {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_FILE_WINDOW)
    }
}

impl FileBlockStore {
    pub fn new(open_file_window: Duration) -> Self {
        Self { open_file_window }
    }

    pub fn open_file_window(&self) -> Duration {
        self.open_file_window
    }

    fn modified_recently(&self, path: &Path) -> bool {
        match self.mtime(path) {
            Ok(mtime) => match SystemTime::now().duration_since(mtime) {
                Ok(age) => age < self.open_file_window,
                // mtime in the future
                Err(_) => true,
            },
            Err(_) => false,
        }
    }
}

impl BlockStore for FileBlockStore {
    type Writer = BlockFileWriter;

    fn create(&self, path: &Path, attrs: &BlockAttributes) -> StorageResult<Self::Writer> {
        BlockFileWriter::create(path, attrs)
    }

    fn read_range(&self, path: &Path, offset: u64, len: u64) -> StorageResult<Vec<u8>> {
        BlockFileReader::open(path)?.read_range(offset, len)
    }

    fn read_attrs(&self, path: &Path) -> StorageResult<BlockAttributes> {
        BlockFileReader::open(path)?.attributes()
    }

    fn read_sample_index(&self, path: &Path) -> StorageResult<BlockIndex> {
        BlockFileReader::open(path)?.sample_index()
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn mtime(&self, path: &Path) -> StorageResult<SystemTime> {
        let meta = std::fs::metadata(path).map_err(|e| StorageError::from_io(path, e))?;
        Ok(meta.modified()?)
    }

    /// Sealed header means closed. An unsealed header means open while the
    /// file was modified within the window, abandoned afterwards. A header
    /// that cannot be read means a writer is mid-update.
    fn is_plausibly_open(&self, path: &Path) -> bool {
        match read_header(path) {
            Ok(header) if header.sealed => false,
            Ok(_) => self.modified_recently(path),
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                debug!(path = ?path, error = %e, "Unreadable block header, treating as open");
                true
            }
        }
    }
}
