//! Channel index
//!
//! Merges the per-root indexes of one channel name into one logical channel.
//! Roots are kept in chronological order and must not overlap:
//!
//! ```text
//! /archive/ch   [S ............ S+4000)
//! /live/ch                              [S+9000 ...... S+12000)
//! channel       [S ............................................ S+12000)
//! ```
//!
//! Public reads wrap the cached primitives in exactly one
//! stale → low-level refresh → retry cycle.
//!
//! Channel-level metadata files (`metadata@<secs>.json`) are gathered from
//! every root on request and never cached.

use crate::index::blocks::{merge_blocks, ContinuousBlock};
use crate::index::error::{ready, Fetch, IndexError, IndexResult};
use crate::index::top_level::{append_continuous, RefreshScope, TopLevelDirIndex};
use crate::index::IndexOptions;
use crate::storage::{layout, BlockAttributes, BlockStore, SampleBuffer, SampleFormat, StorageError};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Scalar attributes shared by every file of a channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMetadata {
    pub sample_rate: f64,
    pub samples_per_file: u64,
    pub files_per_subdirectory: u64,
    pub format: SampleFormat,
    pub uuid: String,
}

impl From<&BlockAttributes> for ChannelMetadata {
    fn from(attrs: &BlockAttributes) -> Self {
        Self {
            sample_rate: attrs.sample_rate,
            samples_per_file: attrs.samples_per_file,
            files_per_subdirectory: attrs.files_per_subdirectory,
            format: attrs.format,
            uuid: attrs.uuid.clone(),
        }
    }
}

impl ChannelMetadata {
    /// Error unless `other` describes the same channel
    fn check(&self, other: &ChannelMetadata, root: &Path) -> IndexResult<()> {
        let mismatch = |what: &str, known: String, found: String| {
            Err(IndexError::Config(format!(
                "{} mismatch in {:?}: channel has {}, root has {}",
                what, root, known, found
            )))
        };
        if self.sample_rate != other.sample_rate {
            return mismatch("Sample rate", self.sample_rate.to_string(), other.sample_rate.to_string());
        }
        if self.samples_per_file != other.samples_per_file {
            return mismatch(
                "Samples per file",
                self.samples_per_file.to_string(),
                other.samples_per_file.to_string(),
            );
        }
        if self.files_per_subdirectory != other.files_per_subdirectory {
            return mismatch(
                "Files per subdirectory",
                self.files_per_subdirectory.to_string(),
                other.files_per_subdirectory.to_string(),
            );
        }
        if self.format != other.format {
            return mismatch("Sample format", self.format.to_string(), other.format.to_string());
        }
        if self.uuid != other.uuid {
            return mismatch("UUID", self.uuid.clone(), other.uuid.clone());
        }
        Ok(())
    }
}

/// Contents of one channel metadata file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataFile {
    pub path: PathBuf,
    /// Unix seconds from which the values apply
    pub timestamp: i64,
    pub values: serde_json::Value,
}

/// One channel across all storage roots
#[derive(Debug, Clone)]
pub struct ChannelIndex {
    name: String,
    /// Sorted by `TopLevelDirIndex::order_key`
    roots: Vec<TopLevelDirIndex>,
    bounds: Option<(u64, u64)>,
    /// Set once, never overwritten
    metadata: Option<ChannelMetadata>,
}

impl ChannelIndex {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            roots: Vec::new(),
            bounds: None,
            metadata: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roots(&self) -> impl Iterator<Item = &TopLevelDirIndex> {
        self.roots.iter()
    }

    pub fn contains_root(&self, root: &Path) -> bool {
        self.roots.iter().any(|r| r.root() == root)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// (first sample, one past last sample) over all roots
    pub fn get_bounds(&self) -> Option<(u64, u64)> {
        self.bounds
    }

    pub fn metadata(&self) -> Option<&ChannelMetadata> {
        self.metadata.as_ref()
    }

    /// High-level refresh of every root
    pub fn update<S: BlockStore>(&mut self, store: &S, options: &IndexOptions) -> IndexResult<()> {
        let mut roots = self.roots.clone();
        for root in &mut roots {
            root.refresh(store, RefreshScope::HighLevel, options)?;
        }
        self.commit(roots)
    }

    /// Low-level refresh of the roots that may hold `[start, start + length]`
    pub fn update_range<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        length: u64,
        options: &IndexOptions,
    ) -> IndexResult<()> {
        let stop = start.saturating_add((length as f64 * options.lowlevel_tolerance).ceil() as u64);
        let mut roots = self.roots.clone();
        for root in &mut roots {
            let touches = match root.bounds() {
                Some((first, end)) => first <= stop && end > start,
                None => true,
            };
            if touches {
                root.refresh(store, RefreshScope::LowLevel { start, length }, options)?;
            }
        }
        self.commit(roots)
    }

    pub fn add_top_level<S: BlockStore>(
        &mut self,
        store: &S,
        root: &Path,
        options: &IndexOptions,
    ) -> IndexResult<()> {
        if self.contains_root(root) {
            return Err(IndexError::InvalidInput(format!(
                "Root {:?} already part of channel {}",
                root, self.name
            )));
        }
        let mut added = TopLevelDirIndex::new(root, &self.name);
        added.refresh(store, RefreshScope::HighLevel, options)?;

        let mut roots = self.roots.clone();
        roots.push(added);
        self.commit(roots)?;
        tracing::info!("Channel {} gained root {:?}", self.name, root);
        Ok(())
    }

    pub fn remove_top_level(&mut self, root: &Path) -> IndexResult<()> {
        let Some(position) = self.roots.iter().position(|r| r.root() == root) else {
            return Err(IndexError::InvalidInput(format!(
                "No root {:?} found in channel {}",
                root, self.name
            )));
        };
        let mut roots = self.roots.clone();
        roots.remove(position);
        self.commit(roots)?;
        tracing::info!("Channel {} lost root {:?}", self.name, root);
        Ok(())
    }

    /// Sort, verify and install a new root list
    fn commit(&mut self, mut roots: Vec<TopLevelDirIndex>) -> IndexResult<()> {
        roots.sort_by_key(|r| r.order_key());
        verify_roots(&self.name, &roots)?;

        let mut metadata = self.metadata.clone();
        for root in &roots {
            let Some(attrs) = root.attributes() else {
                continue;
            };
            let found = ChannelMetadata::from(attrs);
            match &metadata {
                None => metadata = Some(found),
                Some(known) => known.check(&found, root.root())?,
            }
        }

        let first = roots.iter().find_map(|r| r.start_sample());
        let end = roots.iter().rev().find_map(|r| r.bounds().map(|(_, end)| end));
        self.bounds = first.zip(end);
        self.roots = roots;
        self.metadata = metadata;
        Ok(())
    }

    /// Metadata files of every root as (unix seconds, path), oldest first.
    ///
    /// The same file name in two roots is a configuration error.
    pub fn metadata_files(&self) -> IndexResult<Vec<(i64, PathBuf)>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for root in &self.roots {
            for (secs, name) in layout::list_metadata_files(root.channel_dir())? {
                let path = root.channel_dir().join(&name);
                if !seen.insert(name) {
                    return Err(IndexError::Config(format!(
                        "Repeated metadata file name {:?} in channel {}",
                        path, self.name
                    )));
                }
                files.push((secs, path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Newest metadata file, or the newest one at or before `timestamp`
    pub fn get_metadata(&self, timestamp: Option<i64>) -> IndexResult<MetadataFile> {
        let files = self.metadata_files()?;
        let chosen = match timestamp {
            None => files.last(),
            Some(at) => files.iter().rev().find(|(secs, _)| *secs <= at),
        };
        let Some((secs, path)) = chosen else {
            return Err(IndexError::MissingMetadata(match timestamp {
                None => format!("channel {} has no metadata files", self.name),
                Some(at) => format!("channel {} has no metadata file at or before {}", self.name, at),
            }));
        };

        let content = std::fs::read(path).map_err(|e| {
            IndexError::from_storage(path, StorageError::from_io(path, e))
        })?;
        let values: serde_json::Value = serde_json::from_slice(&content).map_err(|e| StorageError::Corruption {
            path: path.clone(),
            reason: format!("Unreadable metadata: {}", e),
        })?;
        tracing::debug!("Read metadata {:?} for channel {}", path, self.name);
        Ok(MetadataFile {
            path: path.clone(),
            timestamp: *secs,
            values,
        })
    }

    /// Continuous blocks within the inclusive range `[start, stop]`
    pub fn get_continuous_blocks<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        stop: u64,
        options: &IndexOptions,
    ) -> IndexResult<Vec<ContinuousBlock>> {
        if stop < start {
            return Ok(Vec::new());
        }
        let length = stop - start + 1;
        self.with_retry(store, start, length, options, |channel| {
            channel.try_continuous_blocks(store, start, stop, options)
        })
    }

    /// `length` samples from `start`; the range must be gap free
    pub fn get_continuous_vector<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        length: u64,
        options: &IndexOptions,
    ) -> IndexResult<SampleBuffer> {
        let stop = start.checked_add(length).ok_or_else(|| {
            IndexError::InvalidInput(format!("Range {}+{} overflows", start, length))
        })?;
        self.with_retry(store, start, length, options, |channel| {
            channel.try_continuous_vector(store, start, stop, options)
        })
    }

    fn with_retry<S: BlockStore, T>(
        &mut self,
        store: &S,
        start: u64,
        length: u64,
        options: &IndexOptions,
        mut fetch: impl FnMut(&mut Self) -> IndexResult<Fetch<T>>,
    ) -> IndexResult<T> {
        if let Fetch::Ready(value) = fetch(self)? {
            return Ok(value);
        }
        tracing::debug!(
            "Index of {} stale for {}+{}, refreshing and retrying",
            self.name,
            start,
            length
        );
        self.update_range(store, start, length, options)?;
        match fetch(self)? {
            Fetch::Ready(value) => Ok(value),
            Fetch::Stale => Err(IndexError::StaleIndex(format!(
                "{} for samples {}+{}",
                self.name, start, length
            ))),
        }
    }

    fn try_continuous_blocks<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        stop: u64,
        options: &IndexOptions,
    ) -> IndexResult<Fetch<Vec<ContinuousBlock>>> {
        let mut blocks = Vec::new();
        for root in &mut self.roots {
            let Some((first, end)) = root.bounds() else {
                continue;
            };
            if end <= start || first > stop {
                continue;
            }
            let found = ready!(root.get_continuous_blocks(store, start, stop, options)?);
            merge_blocks(&mut blocks, found)?;
        }
        Ok(Fetch::Ready(blocks))
    }

    fn try_continuous_vector<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        stop: u64,
        options: &IndexOptions,
    ) -> IndexResult<Fetch<SampleBuffer>> {
        let mut out: Option<SampleBuffer> = None;
        for root in &mut self.roots {
            let Some((first, end)) = root.bounds() else {
                continue;
            };
            if end <= start || first >= stop {
                continue;
            }
            let from = start.max(first);
            let to = stop.min(end);
            let piece = ready!(root.get_continuous_vector(store, from, to, options)?);
            out = Some(append_continuous(out, piece)?);
        }

        match out {
            Some(buffer) if buffer.start_sample == start && buffer.end_sample() == stop => {
                Ok(Fetch::Ready(buffer))
            }
            Some(buffer) => Err(IndexError::Gap(format!(
                "Requested {}..{} of {} but only {}..{} is continuous",
                start,
                stop,
                self.name,
                buffer.start_sample,
                buffer.end_sample()
            ))),
            None => Err(IndexError::Gap(format!(
                "No data for {}..{} in channel {}",
                start, stop, self.name
            ))),
        }
    }
}

/// Roots holding data must be disjoint in sample space
fn verify_roots(channel: &str, roots: &[TopLevelDirIndex]) -> IndexResult<()> {
    let mut last: Option<&TopLevelDirIndex> = None;
    for root in roots.iter().filter(|r| r.extent() > 0) {
        if let (Some(prev), Some(start)) = (last, root.start_sample()) {
            let prev_end = prev.start_sample().unwrap_or(0) + prev.extent();
            if prev_end > start {
                return Err(IndexError::Overlap(format!(
                    "Channel {} in {:?} overlaps {:?}: {} > {}",
                    channel,
                    root.root(),
                    prev.root(),
                    prev_end,
                    start
                )));
            }
        }
        last = Some(root);
    }
    Ok(())
}
