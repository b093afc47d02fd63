//! rfstore index structures
//!
//! A tree of owned indexes answers "where are samples `[a, b)` and are they
//! continuous?" without re-reading every block file on every call:
//!
//! - **CatalogIndex**: all storage roots, `{channel → ChannelIndex}`
//! - **ChannelIndex**: one channel merged across storage roots
//! - **TopLevelDirIndex**: one channel in one root, a summary row per subdirectory
//! - **SubdirectoryIndex**: sample → (file, offset) map of one subdirectory
//!
//! # Architecture
//!
//! ```text
//! reload()      CatalogIndex ─ discover channels per root
//!                 └ ChannelIndex::update ─ TopLevelDirIndex HighLevel refresh
//!                     └ SubdirectoryIndex::refresh (edges only)
//!
//! read_vector   CatalogIndex → ChannelIndex (retry once on Stale)
//!                 → TopLevelDirIndex (binary search rows, update_if_needed)
//!                   → SubdirectoryIndex → BlockStore::read_range
//! ```

pub mod blocks;
pub mod catalog;
pub mod channel;
pub mod error;
pub mod subdirectory;
pub mod top_level;
pub mod typed;

pub use blocks::{clip_blocks, merge_blocks, push_block, ContinuousBlock};
pub use catalog::{AccessMode, CatalogIndex, ReloadScope, StorageRoot};
pub use channel::{ChannelIndex, ChannelMetadata, MetadataFile};
pub use error::{Fetch, IndexError, IndexResult};
pub use subdirectory::SubdirectoryIndex;
pub use top_level::{RefreshScope, SubdirectoryRow, TopLevelDirIndex};
pub use typed::Complex32;

use std::time::Duration;

/// Tunables for refresh decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexOptions {
    /// Unsealed files modified within this window are treated as open
    pub open_file_window: Duration,
    /// Directory stamps whose last mtimes differ by less than this match
    pub mtime_tolerance: Duration,
    /// Multiplier on extents when selecting subdirectories for a low-level refresh
    pub lowlevel_tolerance: f64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            open_file_window: Duration::from_secs(3),
            mtime_tolerance: Duration::from_secs(2),
            lowlevel_tolerance: 1.001,
        }
    }
}
