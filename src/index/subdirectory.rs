//! Subdirectory index
//!
//! Authoritative map from sample index to (file, in-file offset) for one
//! ring-buffer subdirectory, plus its continuous-block list.
//!
//! ```text
//! files:    rf@…000.drf   rf@…400.drf   rf@…800.drf (open)
//! entries:  [S, 0, 40]    [S+40, 0, 40]      (skipped until sealed)
//! blocks:   (S, 80)
//! ```
//!
//! A refresh builds new state from the directory listing and commits it in
//! one step, so a failed refresh leaves the previous state intact.

use crate::index::blocks::{clip_blocks, push_block, ContinuousBlock};
use crate::index::error::{Fetch, IndexError, IndexResult};
use crate::index::IndexOptions;
use crate::storage::layout::{self, DirectoryStamp};
use crate::storage::{BlockAttributes, BlockStore, SampleBuffer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One continuous run inside one file
#[derive(Debug, Clone, PartialEq)]
struct IndexEntry {
    sample: u64,
    offset: u64,
    len: u64,
    file: Arc<str>,
}

impl IndexEntry {
    fn end(&self) -> u64 {
        self.sample + self.len
    }
}

/// Index of one ring-buffer subdirectory
#[derive(Debug, Clone)]
pub struct SubdirectoryIndex {
    name: String,
    path: PathBuf,
    entries: Vec<IndexEntry>,
    blocks: Vec<ContinuousBlock>,
    samples_per_file: Option<u64>,
    attributes: Option<BlockAttributes>,
    /// Listing summary as of the last refresh; `None` until first indexed
    stamp: Option<DirectoryStamp>,
}

impl SubdirectoryIndex {
    pub fn new(channel_dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: channel_dir.join(name),
            entries: Vec::new(),
            blocks: Vec::new(),
            samples_per_file: None,
            attributes: None,
            stamp: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once at least one refresh has completed
    pub fn is_indexed(&self) -> bool {
        self.stamp.is_some()
    }

    pub fn stamp(&self) -> Option<DirectoryStamp> {
        self.stamp
    }

    pub fn samples_per_file(&self) -> Option<u64> {
        self.samples_per_file
    }

    /// Attributes of the first indexed file
    pub fn attributes(&self) -> Option<&BlockAttributes> {
        self.attributes.as_ref()
    }

    pub fn blocks(&self) -> &[ContinuousBlock] {
        &self.blocks
    }

    pub fn first_sample(&self) -> Option<u64> {
        self.entries.first().map(|e| e.sample)
    }

    /// One past the last committed sample
    pub fn end_sample(&self) -> Option<u64> {
        self.entries.last().map(|e| e.end())
    }

    /// (first sample, extent including internal gaps)
    pub fn summary(&self) -> Option<(u64, u64)> {
        match (self.first_sample(), self.end_sample()) {
            (Some(first), Some(end)) => Some((first, end - first)),
            _ => None,
        }
    }

    /// Refresh only if the observed listing differs from the cached one.
    ///
    /// Returns true if a refresh ran.
    pub fn update_if_needed<S: BlockStore>(
        &mut self,
        store: &S,
        observed: &DirectoryStamp,
        options: &IndexOptions,
    ) -> IndexResult<bool> {
        if let Some(stamp) = &self.stamp {
            if stamp.matches(observed, options.mtime_tolerance) {
                return Ok(false);
            }
        }
        tracing::debug!(
            "Subdirectory {} changed ({:?} -> {:?}), refreshing",
            self.name,
            self.stamp,
            observed
        );
        self.refresh(store)?;
        Ok(true)
    }

    /// Re-list the subdirectory and bring the index up to date
    pub fn refresh<S: BlockStore>(&mut self, store: &S) -> IndexResult<()> {
        let files = layout::list_block_files(&self.path)?;

        let last_open = match files.last() {
            Some(last) => store.is_plausibly_open(&self.path.join(last)),
            None => false,
        };
        let committed = if last_open {
            &files[..files.len() - 1]
        } else {
            &files[..]
        };

        let mut scan = Scan {
            samples_per_file: self.samples_per_file,
            attributes: self.attributes.clone(),
        };

        let fast = if self.entries.is_empty() {
            scan.fast_path(store, &self.path, committed)?
        } else {
            None
        };
        let entries = match fast {
            Some(entries) => entries,
            None => scan.incremental(store, &self.path, &self.entries, committed)?,
        };

        let blocks = build_blocks(&entries)?;
        let stamp = stamp_files(&self.path, committed)?;

        tracing::debug!(
            "Indexed subdirectory {}: {} files ({} open), {} entries, {} blocks",
            self.name,
            files.len(),
            usize::from(last_open),
            entries.len(),
            blocks.len()
        );

        self.entries = entries;
        self.blocks = blocks;
        self.samples_per_file = scan.samples_per_file;
        self.attributes = scan.attributes;
        self.stamp = Some(stamp);
        Ok(())
    }

    /// Continuous blocks within the inclusive range `[start, stop]`
    pub fn get_continuous_blocks(&self, start: u64, stop: u64) -> Fetch<Vec<ContinuousBlock>> {
        if !self.is_indexed() {
            return Fetch::Stale;
        }
        Fetch::Ready(clip_blocks(&self.blocks, start, stop))
    }

    /// Samples in `[start, stop)`, which must lie inside one continuous block
    pub fn get_continuous_vector<S: BlockStore>(
        &self,
        store: &S,
        start: u64,
        stop: u64,
    ) -> IndexResult<Fetch<SampleBuffer>> {
        let format = match (&self.attributes, self.is_indexed()) {
            (Some(attrs), true) => attrs.format,
            _ => return Ok(Fetch::Stale),
        };
        if stop <= start {
            return Ok(Fetch::Ready(SampleBuffer::empty(format, start)));
        }

        let covering = self.blocks.partition_point(|b| b.start <= start);
        let covered = covering > 0 && self.blocks[covering - 1].end() >= stop;
        if !covered {
            return Err(IndexError::Gap(format!(
                "Samples {}..{} not continuous in subdirectory {}",
                start, stop, self.name
            )));
        }

        let first = self.entries.partition_point(|e| e.sample <= start) - 1;
        let mut buffer = SampleBuffer::empty(format, start);
        let mut at = start;

        for entry in &self.entries[first..] {
            if at >= stop {
                break;
            }
            let from = at.max(entry.sample);
            let to = entry.end().min(stop);
            if to <= from {
                continue;
            }
            let path = self.path.join(&*entry.file);
            let data = store
                .read_range(&path, entry.offset + (from - entry.sample), to - from)
                .map_err(|e| IndexError::from_storage(&path, e))?;
            buffer.extend_from_slice(&data);
            at = to;
        }

        if at != stop {
            return Err(IndexError::Gap(format!(
                "Read of {}..{} in subdirectory {} stopped at {}",
                start, stop, self.name, at
            )));
        }
        Ok(Fetch::Ready(buffer))
    }
}

/// Working state of one refresh
struct Scan {
    samples_per_file: Option<u64>,
    attributes: Option<BlockAttributes>,
}

impl Scan {
    /// Read a file's runs. `None` if the file vanished.
    fn read_file<S: BlockStore>(
        &mut self,
        store: &S,
        dir: &Path,
        name: &str,
    ) -> IndexResult<Option<Vec<IndexEntry>>> {
        let path = dir.join(name);
        let index = match store.read_sample_index(&path) {
            Ok(index) => index,
            Err(e) if e.is_not_found() => {
                tracing::warn!("Block file {:?} vanished during refresh", path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match self.samples_per_file {
            None => self.samples_per_file = Some(index.samples_per_file),
            Some(spf) if spf != index.samples_per_file => {
                return Err(IndexError::Config(format!(
                    "Illegal change in samples_per_file from {} to {} in {:?}",
                    spf, index.samples_per_file, path
                )));
            }
            Some(_) => {}
        }

        if self.attributes.is_none() {
            match store.read_attrs(&path) {
                Ok(attrs) => self.attributes = Some(attrs),
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        let file: Arc<str> = Arc::from(name);
        Ok(Some(
            index
                .runs()?
                .into_iter()
                .map(|run| IndexEntry {
                    sample: run.sample,
                    offset: run.offset,
                    len: run.len,
                    file: Arc::clone(&file),
                })
                .collect(),
        ))
    }

    /// Build all entries from the first and last files alone.
    ///
    /// Valid when both hold a single run and their distance equals
    /// `(n - 1) * samples_per_file`: one writer session fills every file but
    /// the last, so the files in between are full and contiguous.
    fn fast_path<S: BlockStore>(
        &mut self,
        store: &S,
        dir: &Path,
        files: &[String],
    ) -> IndexResult<Option<Vec<IndexEntry>>> {
        let (Some(first_name), Some(last_name)) = (files.first(), files.last()) else {
            return Ok(None);
        };
        let Some(first) = self.read_file(store, dir, first_name)? else {
            return Ok(None);
        };
        let last = if files.len() == 1 {
            first.clone()
        } else {
            match self.read_file(store, dir, last_name)? {
                Some(last) => last,
                None => return Ok(None),
            }
        };
        let (Some(spf), [first], [last]) = (self.samples_per_file, &first[..], &last[..]) else {
            return Ok(None);
        };

        let n = files.len() as u64;
        let full_first = n == 1 || first.len == spf;
        if !full_first || first.offset != 0 || last.offset != 0 {
            return Ok(None);
        }
        if last.sample.checked_sub(first.sample) != Some((n - 1) * spf) {
            return Ok(None);
        }

        tracing::debug!("Fast path for {:?}: {} contiguous files", dir, n);
        Ok(Some(
            files
                .iter()
                .enumerate()
                .map(|(k, name)| IndexEntry {
                    sample: first.sample + k as u64 * spf,
                    offset: 0,
                    len: if k as u64 == n - 1 { last.len } else { spf },
                    file: Arc::from(name.as_str()),
                })
                .collect(),
        ))
    }

    /// Drop entries of deleted files and read files newer than the last
    /// committed one
    fn incremental<S: BlockStore>(
        &mut self,
        store: &S,
        dir: &Path,
        existing: &[IndexEntry],
        files: &[String],
    ) -> IndexResult<Vec<IndexEntry>> {
        let present: HashSet<&str> = files.iter().map(String::as_str).collect();
        let mut entries: Vec<IndexEntry> = existing
            .iter()
            .filter(|e| present.contains(&*e.file))
            .cloned()
            .collect();

        let dropped = existing.len() - entries.len();
        if dropped > 0 {
            tracing::debug!("Dropped {} entries for deleted files in {:?}", dropped, dir);
        }

        let newer_than = entries.last().map(|e| e.file.to_string());
        for name in files {
            if let Some(last) = &newer_than {
                if name.as_str() <= last.as_str() {
                    continue;
                }
            }
            if let Some(rows) = self.read_file(store, dir, name)? {
                entries.extend(rows);
            }
        }
        Ok(entries)
    }
}

/// Continuous blocks of a sorted entry list; entries must never overlap
fn build_blocks(entries: &[IndexEntry]) -> IndexResult<Vec<ContinuousBlock>> {
    let mut blocks = Vec::new();
    for pair in entries.windows(2) {
        if pair[0].end() > pair[1].sample {
            return Err(IndexError::Overlap(format!(
                "File {} ends at sample {} after {} starts at {}",
                pair[0].file,
                pair[0].end(),
                pair[1].file,
                pair[1].sample
            )));
        }
    }
    for entry in entries {
        push_block(&mut blocks, ContinuousBlock::new(entry.sample, entry.len))?;
    }
    Ok(blocks)
}

/// Stamp of the committed files, in the same form as `layout::stamp_subdirectory`
fn stamp_files(dir: &Path, files: &[String]) -> IndexResult<DirectoryStamp> {
    let last_mtime = match files.last() {
        Some(name) => match std::fs::metadata(dir.join(name)) {
            Ok(meta) => Some(meta.modified()?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };
    Ok(DirectoryStamp {
        file_count: files.len(),
        last_mtime,
    })
}
