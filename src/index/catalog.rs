//! Catalog index
//!
//! Entry point of the reader. Owns the configured storage roots and the
//! `{channel name → ChannelIndex}` map. Every public read goes through
//! `ChannelIndex`, which retries once on a stale index.
//!
//! # Example
//!
//! ```no_run
//! use rfstore::index::{CatalogIndex, StorageRoot};
//!
//! let roots = vec![StorageRoot::parse("/data/ringbuffer")];
//! let mut catalog = CatalogIndex::open(roots).unwrap();
//! for channel in catalog.get_channels() {
//!     let (start, end) = catalog.get_bounds(&channel).unwrap();
//!     let samples = catalog.read_vector(start, (end - start).min(1000), &channel).unwrap();
//!     println!("{}: {} samples", channel, samples.len());
//! }
//! ```

use crate::index::blocks::ContinuousBlock;
use crate::index::channel::{ChannelIndex, ChannelMetadata, MetadataFile};
use crate::index::error::{IndexError, IndexResult};
use crate::index::typed::{to_complex32, Complex32};
use crate::index::IndexOptions;
use crate::storage::layout;
use crate::storage::{BlockStore, FileBlockStore, SampleBuffer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// How a storage root is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Local,
    File,
    Http,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Local => write!(f, "local"),
            AccessMode::File => write!(f, "file"),
            AccessMode::Http => write!(f, "http"),
        }
    }
}

/// A top-level directory that may hold channel subtrees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    pub locator: String,
    pub mode: AccessMode,
}

impl StorageRoot {
    /// Tag a locator with its access mode; plain paths are local
    pub fn parse(locator: &str) -> Self {
        let mode = if locator.starts_with("file://") {
            AccessMode::File
        } else if locator.starts_with("http://") || locator.starts_with("https://") {
            AccessMode::Http
        } else {
            AccessMode::Local
        };
        Self {
            locator: locator.to_string(),
            mode,
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            locator: path.as_ref().to_string_lossy().into_owned(),
            mode: AccessMode::Local,
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.locator)
    }
}

/// Target of a low-level reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadScope {
    pub channel: String,
    pub start: u64,
    pub length: u64,
}

/// All channels across all storage roots
#[derive(Debug)]
pub struct CatalogIndex<S: BlockStore = FileBlockStore> {
    roots: Vec<StorageRoot>,
    channels: BTreeMap<String, ChannelIndex>,
    store: S,
    options: IndexOptions,
}

impl CatalogIndex<FileBlockStore> {
    /// Open with default options and run a high-level reload
    pub fn open(roots: Vec<StorageRoot>) -> IndexResult<Self> {
        Self::open_with_options(roots, IndexOptions::default())
    }

    pub fn open_with_options(roots: Vec<StorageRoot>, options: IndexOptions) -> IndexResult<Self> {
        let store = FileBlockStore::new(options.open_file_window);
        Self::with_store(store, roots, options)
    }
}

impl<S: BlockStore> CatalogIndex<S> {
    /// Open over a custom block store and run a high-level reload
    pub fn with_store(store: S, roots: Vec<StorageRoot>, options: IndexOptions) -> IndexResult<Self> {
        if let Some(root) = roots.iter().find(|r| r.mode != AccessMode::Local) {
            return Err(IndexError::Config(format!(
                "Access mode {} not implemented for {}",
                root.mode, root.locator
            )));
        }
        let mut catalog = Self {
            roots,
            channels: BTreeMap::new(),
            store,
            options,
        };
        catalog.reload(None)?;
        Ok(catalog)
    }

    pub fn roots(&self) -> &[StorageRoot] {
        &self.roots
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Without a scope, rediscover channels and roots at high level.
    /// With one, re-index the subdirectories of one channel near the range.
    pub fn reload(&mut self, scope: Option<ReloadScope>) -> IndexResult<()> {
        match scope {
            None => self.high_level_reload(),
            Some(scope) => {
                let channel = self
                    .channels
                    .get_mut(&scope.channel)
                    .ok_or_else(|| IndexError::ChannelNotFound(scope.channel.clone()))?;
                channel.update_range(&self.store, scope.start, scope.length, &self.options)
            }
        }
    }

    fn high_level_reload(&mut self) -> IndexResult<()> {
        let mut found: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for root in &self.roots {
            for name in layout::list_channels(root.path())? {
                found.entry(name).or_default().push(root.path().to_path_buf());
            }
        }

        let mut channels = self.channels.clone();
        channels.retain(|name, _| {
            let keep = found.contains_key(name);
            if !keep {
                tracing::info!("Channel {} no longer present in any root", name);
            }
            keep
        });

        for (name, paths) in &found {
            let channel = channels.entry(name.clone()).or_insert_with(|| {
                tracing::info!("Discovered channel {} in {} root(s)", name, paths.len());
                ChannelIndex::new(name)
            });

            let gone: Vec<PathBuf> = channel
                .roots()
                .map(|r| r.root().to_path_buf())
                .filter(|p| !paths.contains(p))
                .collect();
            for path in gone {
                channel.remove_top_level(&path)?;
            }

            channel.update(&self.store, &self.options)?;

            for path in paths {
                if !channel.contains_root(path) {
                    channel.add_top_level(&self.store, path, &self.options)?;
                }
            }
        }

        self.channels = channels;
        Ok(())
    }

    /// Channel names, sorted
    pub fn get_channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    fn channel(&self, name: &str) -> IndexResult<&ChannelIndex> {
        self.channels
            .get(name)
            .ok_or_else(|| IndexError::ChannelNotFound(name.to_string()))
    }

    /// (first sample, one past last sample) of committed data
    pub fn get_bounds(&self, channel: &str) -> IndexResult<(u64, u64)> {
        self.channel(channel)?
            .get_bounds()
            .ok_or_else(|| IndexError::NoData(channel.to_string()))
    }

    /// Attributes captured from the first indexed block file
    pub fn get_channel_metadata(&self, channel: &str) -> IndexResult<ChannelMetadata> {
        self.channel(channel)?
            .metadata()
            .cloned()
            .ok_or_else(|| IndexError::NoData(channel.to_string()))
    }

    /// Channel metadata file in effect at `timestamp` (unix seconds), or the
    /// newest one
    pub fn get_metadata(&self, channel: &str, timestamp: Option<i64>) -> IndexResult<MetadataFile> {
        self.channel(channel)?.get_metadata(timestamp)
    }

    /// Continuous blocks within the inclusive range `[start, stop]`
    pub fn get_continuous_blocks(
        &mut self,
        start: u64,
        stop: u64,
        channel: &str,
    ) -> IndexResult<Vec<ContinuousBlock>> {
        let index = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| IndexError::ChannelNotFound(channel.to_string()))?;
        index.get_continuous_blocks(&self.store, start, stop, &self.options)
    }

    /// `length` continuous samples from `start`
    pub fn read_vector(&mut self, start: u64, length: u64, channel: &str) -> IndexResult<SampleBuffer> {
        if length == 0 {
            return Err(IndexError::InvalidInput(format!(
                "Vector length must be positive, got {}",
                length
            )));
        }
        let (_, end) = self.get_bounds(channel)?;
        if start >= end {
            return Err(IndexError::InvalidInput(format!(
                "Sample {} is at or beyond the end {} of channel {}",
                start, end, channel
            )));
        }
        let index = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| IndexError::ChannelNotFound(channel.to_string()))?;
        index.get_continuous_vector(&self.store, start, length, &self.options)
    }

    /// One subchannel of a complex channel as single-precision complex values
    pub fn read_vector_typed(
        &mut self,
        start: u64,
        length: u64,
        channel: &str,
        subchannel: u32,
    ) -> IndexResult<Vec<Complex32>> {
        let buffer = self.read_vector(start, length, channel)?;
        to_complex32(&buffer, subchannel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChannelWriter, SampleFormat, ScalarType, WriterConfig};
    use tempfile::tempdir;

    const START: u64 = 1_700_000_000 * 100;

    fn config(format: SampleFormat) -> WriterConfig {
        WriterConfig {
            samples_per_file: 40,
            files_per_subdirectory: 10,
            start_sample: START,
            sample_rate: 100.0,
            uuid: Some("catalog-test".to_string()),
            format,
            subdirectory_cadence_secs: None,
            max_subdirectories: None,
        }
    }

    fn write_real(root: &Path, channel: &str, count: u64) {
        let mut writer =
            ChannelWriter::create(root, channel, config(SampleFormat::real(ScalarType::U16))).unwrap();
        let data: Vec<u16> = (0..count).map(|i| i as u16).collect();
        writer.write(&data, None).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_channel_metadata_files() {
        let dir = tempdir().unwrap();
        write_real(dir.path(), "ch", 100);
        let channel_dir = dir.path().join("ch");
        for (secs, rate) in [(1_700_000_000, 1.0e6), (1_700_000_060, 2.0e6)] {
            let values = serde_json::json!({ "tx_rate": rate });
            crate::storage::write_metadata_file(&channel_dir, secs, &values).unwrap();
        }

        let catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        let latest = catalog.get_metadata("ch", None).unwrap();
        assert_eq!(latest.values["tx_rate"], 2.0e6);
        let earlier = catalog.get_metadata("ch", Some(1_700_000_059)).unwrap();
        assert_eq!(earlier.timestamp, 1_700_000_000);

        assert!(matches!(
            catalog.get_metadata("missing", None),
            Err(IndexError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn test_parse_access_modes() {
        assert_eq!(StorageRoot::parse("/data/rf").mode, AccessMode::Local);
        assert_eq!(StorageRoot::parse("file:///data/rf").mode, AccessMode::File);
        assert_eq!(StorageRoot::parse("http://host/rf").mode, AccessMode::Http);
        assert_eq!(StorageRoot::parse("https://host/rf").mode, AccessMode::Http);
    }

    #[test]
    fn test_remote_roots_rejected() {
        let dir = tempdir().unwrap();
        let roots = vec![StorageRoot::local(dir.path()), StorageRoot::parse("http://host/rf")];
        assert!(matches!(CatalogIndex::open(roots), Err(IndexError::Config(_))));
    }

    #[test]
    fn test_discovers_channels() {
        let dir = tempdir().unwrap();
        write_real(dir.path(), "beta", 100);
        write_real(dir.path(), "alpha", 100);
        std::fs::create_dir_all(dir.path().join("not-a-channel").join("misc")).unwrap();

        let catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        assert_eq!(catalog.get_channels(), vec!["alpha", "beta"]);
        assert_eq!(catalog.get_bounds("alpha").unwrap(), (START, START + 100));

        let metadata = catalog.get_channel_metadata("beta").unwrap();
        assert_eq!(metadata.uuid, "catalog-test");
        assert_eq!(metadata.sample_rate, 100.0);
        assert!(matches!(
            catalog.get_bounds("gamma"),
            Err(IndexError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn test_vanished_channel_dropped() {
        let dir = tempdir().unwrap();
        write_real(dir.path(), "alpha", 100);
        write_real(dir.path(), "beta", 100);
        let mut catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();

        std::fs::remove_dir_all(dir.path().join("beta")).unwrap();
        catalog.reload(None).unwrap();
        assert_eq!(catalog.get_channels(), vec!["alpha"]);
    }

    #[test]
    fn test_open_channel_has_no_data() {
        let dir = tempdir().unwrap();
        let mut writer =
            ChannelWriter::create(dir.path(), "live", config(SampleFormat::real(ScalarType::U16))).unwrap();
        writer.write(&[1u16, 2, 3], None).unwrap();

        let catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        assert_eq!(catalog.get_channels(), vec!["live"]);
        assert!(matches!(catalog.get_bounds("live"), Err(IndexError::NoData(_))));
        writer.close().unwrap();
    }

    #[test]
    fn test_read_validation() {
        let dir = tempdir().unwrap();
        write_real(dir.path(), "alpha", 100);
        let mut catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();

        assert!(matches!(
            catalog.read_vector(START, 0, "alpha"),
            Err(IndexError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.read_vector(START + 100, 1, "alpha"),
            Err(IndexError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.read_vector(START + 90, 20, "alpha"),
            Err(IndexError::Gap(_))
        ));
        assert!(matches!(
            catalog.read_vector(START, 1, "nope"),
            Err(IndexError::ChannelNotFound(_))
        ));

        let buffer = catalog.read_vector(START + 10, 5, "alpha").unwrap();
        assert_eq!(buffer.subchannel_values(0).unwrap(), vec![10.0, 11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn test_scoped_reload() {
        let dir = tempdir().unwrap();
        write_real(dir.path(), "alpha", 1000);
        let mut catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();

        catalog
            .reload(Some(ReloadScope {
                channel: "alpha".to_string(),
                start: START,
                length: 1000,
            }))
            .unwrap();
        let blocks = catalog.get_continuous_blocks(START, START + 999, "alpha").unwrap();
        assert_eq!(blocks, vec![ContinuousBlock::new(START, 1000)]);

        let missing = catalog.reload(Some(ReloadScope {
            channel: "nope".to_string(),
            start: START,
            length: 1,
        }));
        assert!(matches!(missing, Err(IndexError::ChannelNotFound(_))));
    }

    #[test]
    fn test_read_vector_typed() {
        let dir = tempdir().unwrap();
        let format = SampleFormat::new(ScalarType::I16, true, 2).unwrap();
        let mut writer = ChannelWriter::create(dir.path(), "iq", config(format)).unwrap();
        let data: Vec<i16> = (0..50i16).flat_map(|i| [i, -i, 100 + i, -100 - i]).collect();
        writer.write(&data, None).unwrap();
        writer.close().unwrap();
        write_real(dir.path(), "power", 50);

        let mut catalog = CatalogIndex::open(vec![StorageRoot::local(dir.path())]).unwrap();
        let values = catalog.read_vector_typed(START + 45, 3, "iq", 1).unwrap();
        assert_eq!(values[0], Complex32::new(145.0, -145.0));
        assert_eq!(values[2], Complex32::new(147.0, -147.0));

        assert!(matches!(
            catalog.read_vector_typed(START, 3, "iq", 2),
            Err(IndexError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.read_vector_typed(START, 3, "power", 0),
            Err(IndexError::InvalidInput(_))
        ));
    }
}
