//! rfstore block storage
//!
//! This module provides everything below the index:
//!
//! - **types**: Sample formats, block attributes, per-file index rows
//! - **block_file**: Binary block file format
//! - **block_store**: `BlockStore` trait and the local file implementation
//! - **layout**: Ring-buffer directory and file naming
//! - **writer**: Channel writer with file and subdirectory rotation
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   samples → ChannelWriter → rotate subdirectory/file → BlockWriter::append
//!
//! Read Path:
//!   index → layout listing → BlockStore::read_sample_index / read_range
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rfstore::storage::{ChannelWriter, SampleFormat, ScalarType, WriterConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let format = SampleFormat::complex(ScalarType::I16);
//!     let config = WriterConfig::new(format, 1_000_000.0, 1_700_000_000 * 1_000_000);
//!     let mut writer = ChannelWriter::create("/data/rf", "ch0", config)?;
//!
//!     writer.write(&vec![0i16; 2 * 10_000], None)?;
//!     writer.close()?;
//!     Ok(())
//! }
//! ```

pub mod block_file;
pub mod block_store;
pub mod error;
pub mod layout;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use block_file::{BlockFileReader, BlockFileWriter, BlockHeader};
pub use block_store::{BlockStore, BlockWriter, FileBlockStore, DEFAULT_OPEN_FILE_WINDOW};
pub use error::{StorageError, StorageResult};
pub use layout::DirectoryStamp;
pub use types::{
    encode_samples, BlockAttributes, BlockIndex, IndexRow, Sample, SampleBuffer, SampleFormat,
    SampleRun, ScalarType,
};
pub use writer::{write_metadata_file, ChannelWriter, WriterConfig};
