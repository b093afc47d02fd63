//! # rfstore
//!
//! Ring-buffer directory storage for high-rate sampled RF data, with a lazy
//! metadata index and gap-aware continuous reads.
//!
//! ## Features
//!
//! - **Ring-buffer layout**: fixed-capacity block files in timestamp-named subdirectories
//! - **Lazy indexing**: high-level listings first, per-subdirectory detail on demand
//! - **Realtime tailing**: files still being written are left out until sealed
//! - **Multiple roots**: archived and live roots merge into one channel
//!
//! ## Modules
//!
//! - [`storage`]: block files, directory layout and the channel writer
//! - [`index`]: catalog, channel, root and subdirectory indexes
//! - [`shared`]: async handle over a catalog
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rfstore::index::{CatalogIndex, StorageRoot};
//! use rfstore::storage::{ChannelWriter, SampleFormat, ScalarType, WriterConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let start = 1_700_000_000 * 1000;
//!     let config = WriterConfig::new(SampleFormat::complex(ScalarType::I16), 1000.0, start);
//!     let mut writer = ChannelWriter::create("/data/rf", "ch0", config)?;
//!     writer.write(&[1i16, -1, 2, -2], None)?;
//!     writer.close()?;
//!
//!     let mut catalog = CatalogIndex::open(vec![StorageRoot::parse("/data/rf")])?;
//!     let samples = catalog.read_vector_typed(start, 2, "ch0", 0)?;
//!     println!("{:?}", samples);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod shared;
pub mod storage;

pub use config::{Config, ConfigError, LoggingConfig, ReaderConfig};

pub use index::{
    AccessMode, CatalogIndex, ChannelIndex, ChannelMetadata, Complex32, ContinuousBlock,
    IndexError, IndexOptions, IndexResult, MetadataFile, ReloadScope, StorageRoot,
};

pub use shared::SharedCatalog;

pub use storage::{
    BlockStore, ChannelWriter, FileBlockStore, SampleBuffer, SampleFormat, ScalarType,
    StorageError, StorageResult, WriterConfig,
};
