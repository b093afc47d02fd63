//! Top-level directory index
//!
//! Aggregates every subdirectory of one channel inside one storage root.
//! Keeps a compact summary row per subdirectory:
//!
//! ```text
//! name                 start_sample   extent  file_count  last_mtime
//! 2023-11-14T22:13:20  170000000000   1000    10          …
//! 2023-11-14T22:13:30  170000001000   0       0           -      ← estimate only
//! ```
//!
//! A row with extent 0 whose subdirectory was never indexed only carries an
//! estimated start (name time × sample rate). Reads touching such a row
//! return `Fetch::Stale`; a low-level refresh over the range fills it in.
//!
//! Subdirectory names have one-second resolution, so an estimate never
//! exceeds the real start and trails it by less than one second of samples.

use crate::index::blocks::{merge_blocks, ContinuousBlock};
use crate::index::error::{ready, Fetch, IndexError, IndexResult};
use crate::index::subdirectory::SubdirectoryIndex;
use crate::index::IndexOptions;
use crate::storage::layout;
use crate::storage::{BlockAttributes, BlockStore, SampleBuffer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// How much of a root to refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    /// Directory listing only, plus the edge subdirectories for bounds
    HighLevel,
    /// Fully re-index the subdirectories near `[start, start + length]`
    LowLevel { start: u64, length: u64 },
}

/// Summary of one subdirectory
#[derive(Debug, Clone, PartialEq)]
pub struct SubdirectoryRow {
    pub name: String,
    /// Exact once indexed, otherwise estimated from the name
    pub start_sample: u64,
    /// 0 until indexed
    pub extent: u64,
    pub file_count: usize,
    pub last_mtime: Option<SystemTime>,
}

#[derive(Debug, Clone)]
struct SubdirectoryEntry {
    row: SubdirectoryRow,
    index: SubdirectoryIndex,
}

impl SubdirectoryEntry {
    fn new(channel_dir: &Path, name: &str, estimated_start: u64) -> Self {
        Self {
            row: SubdirectoryRow {
                name: name.to_string(),
                start_sample: estimated_start,
                extent: 0,
                file_count: 0,
                last_mtime: None,
            },
            index: SubdirectoryIndex::new(channel_dir, name),
        }
    }

    /// Copy the index summary into the row
    fn sync_row(&mut self) {
        if let Some((start, extent)) = self.index.summary() {
            self.row.start_sample = start;
            self.row.extent = extent;
        } else {
            self.row.extent = 0;
        }
        if let Some(stamp) = self.index.stamp() {
            self.row.file_count = stamp.file_count;
            self.row.last_mtime = stamp.last_mtime;
        }
    }

    fn refresh<S: BlockStore>(&mut self, store: &S) -> IndexResult<()> {
        self.index.refresh(store)?;
        self.sync_row();
        Ok(())
    }

    /// Refresh if the on-disk listing moved since the last refresh; true if it did
    fn refresh_if_needed<S: BlockStore>(&mut self, store: &S, options: &IndexOptions) -> IndexResult<bool> {
        let observed = layout::stamp_subdirectory(self.index.path())?;
        let refreshed = self.index.update_if_needed(store, &observed, options)?;
        if refreshed {
            self.sync_row();
        }
        Ok(refreshed)
    }
}

/// Index of one channel within one storage root
#[derive(Debug, Clone)]
pub struct TopLevelDirIndex {
    root: PathBuf,
    channel: String,
    channel_dir: PathBuf,
    subdirectories: Vec<SubdirectoryEntry>,
    /// (first sample, one past last sample) of committed data
    bounds: Option<(u64, u64)>,
    samples_per_file: Option<u64>,
    attributes: Option<BlockAttributes>,
}

impl TopLevelDirIndex {
    pub fn new(root: &Path, channel: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            channel: channel.to_string(),
            channel_dir: root.join(channel),
            subdirectories: Vec::new(),
            bounds: None,
            samples_per_file: None,
            attributes: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn channel_dir(&self) -> &Path {
        &self.channel_dir
    }

    /// (first sample, one past last sample)
    pub fn bounds(&self) -> Option<(u64, u64)> {
        self.bounds
    }

    pub fn start_sample(&self) -> Option<u64> {
        self.bounds.map(|(start, _)| start)
    }

    pub fn extent(&self) -> u64 {
        self.bounds.map(|(start, end)| end - start).unwrap_or(0)
    }

    pub fn samples_per_file(&self) -> Option<u64> {
        self.samples_per_file
    }

    /// Attributes of the first indexed block file
    pub fn attributes(&self) -> Option<&BlockAttributes> {
        self.attributes.as_ref()
    }

    pub fn rows(&self) -> impl Iterator<Item = &SubdirectoryRow> {
        self.subdirectories.iter().map(|e| &e.row)
    }

    pub fn first_subdirectory(&self) -> Option<&str> {
        self.subdirectories.first().map(|e| e.row.name.as_str())
    }

    /// Position in a channel's chronological root order: exact start, or the
    /// first subdirectory's estimated start, with the subdirectory name and
    /// root path breaking ties
    pub fn order_key(&self) -> (u64, String, PathBuf) {
        let start = match (self.start_sample(), self.subdirectories.first()) {
            (Some(start), _) => start,
            (None, Some(first)) => first.row.start_sample,
            (None, None) => u64::MAX,
        };
        let name = self.first_subdirectory().unwrap_or_default().to_string();
        (start, name, self.root.clone())
    }

    pub fn refresh<S: BlockStore>(
        &mut self,
        store: &S,
        scope: RefreshScope,
        options: &IndexOptions,
    ) -> IndexResult<()> {
        let mut next = self.clone();
        match scope {
            RefreshScope::HighLevel => next.high_level_reload(store, options)?,
            RefreshScope::LowLevel { start, length } => {
                next.low_level_reload(store, start, length, options)?
            }
        }
        *self = next;
        Ok(())
    }

    fn high_level_reload<S: BlockStore>(&mut self, store: &S, options: &IndexOptions) -> IndexResult<()> {
        let names = layout::list_subdirectories(&self.channel_dir)?;
        let present: HashSet<&str> = names.iter().map(String::as_str).collect();

        let before = self.subdirectories.len();
        self.subdirectories
            .retain(|e| present.contains(e.row.name.as_str()));
        let removed = before - self.subdirectories.len();

        let known: HashSet<String> = self
            .subdirectories
            .iter()
            .map(|e| e.row.name.clone())
            .collect();
        let mut added = 0;
        for name in names.iter().filter(|n| !known.contains(*n)) {
            let secs = layout::parse_subdirectory_name(name).unwrap_or(0);
            let mut entry = SubdirectoryEntry::new(&self.channel_dir, name, 0);
            match self.sample_rate() {
                Some(rate) => entry.row.start_sample = layout::unix_to_sample(secs, rate),
                None => {
                    entry.refresh(store)?;
                    capture(&mut self.samples_per_file, &mut self.attributes, &entry.index)?;
                    if entry.index.summary().is_none() {
                        if let Some(rate) = self.sample_rate() {
                            entry.row.start_sample = layout::unix_to_sample(secs, rate);
                        }
                    }
                }
            }
            self.subdirectories.push(entry);
            added += 1;
        }
        self.subdirectories
            .sort_by(|a, b| a.row.name.cmp(&b.row.name));

        if added > 0 || removed > 0 {
            tracing::info!(
                "Channel {} in {:?}: {} subdirectories added, {} removed",
                self.channel,
                self.root,
                added,
                removed
            );
        }

        self.refresh_edges(store, options)?;
        self.verify()?;
        self.bounds = self.compute_bounds();
        Ok(())
    }

    /// Index the first and last non-empty subdirectories so bounds are exact
    fn refresh_edges<S: BlockStore>(&mut self, store: &S, options: &IndexOptions) -> IndexResult<()> {
        let len = self.subdirectories.len();
        for i in 0..len {
            if self.touch(store, i, options)? {
                break;
            }
        }
        for i in (0..len).rev() {
            if self.touch(store, i, options)? {
                break;
            }
        }
        Ok(())
    }

    /// Bring one subdirectory up to date; true if it holds committed data
    fn touch<S: BlockStore>(&mut self, store: &S, i: usize, options: &IndexOptions) -> IndexResult<bool> {
        let entry = &mut self.subdirectories[i];
        if entry.index.is_indexed() {
            entry.refresh_if_needed(store, options)?;
        } else {
            entry.refresh(store)?;
        }
        let has_data = entry.index.summary().is_some();
        capture(&mut self.samples_per_file, &mut self.attributes, &self.subdirectories[i].index)?;
        Ok(has_data)
    }

    fn low_level_reload<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        length: u64,
        options: &IndexOptions,
    ) -> IndexResult<()> {
        let selected = self.select(start, length, options.lowlevel_tolerance);
        tracing::debug!(
            "Low-level reload of {} in {:?} for {}+{}: {} subdirectories",
            self.channel,
            self.root,
            start,
            length,
            selected.len()
        );
        for i in selected {
            self.subdirectories[i].refresh(store)?;
            capture(&mut self.samples_per_file, &mut self.attributes, &self.subdirectories[i].index)?;
        }
        self.verify()?;
        self.bounds = self.compute_bounds();
        Ok(())
    }

    /// Subdirectories whose estimated range meets `[start, start + length]`
    fn select(&self, start: u64, length: u64, tolerance: f64) -> Vec<usize> {
        let stop = start.saturating_add((length as f64 * tolerance).ceil() as u64);
        (0..self.subdirectories.len())
            .filter(|&i| {
                let row = &self.subdirectories[i].row;
                let end = if row.extent > 0 {
                    row.start_sample
                        .saturating_add((row.extent as f64 * tolerance).ceil() as u64)
                } else {
                    self.latest_end(i).max(row.start_sample + 1)
                };
                row.start_sample <= stop && end > start
            })
            .collect()
    }

    /// Upper bound on the real start of subdirectory `i`
    fn latest_start(&self, i: usize) -> u64 {
        let row = &self.subdirectories[i].row;
        if row.extent > 0 {
            return row.start_sample;
        }
        let slack = self
            .sample_rate()
            .map(|rate| rate.ceil() as u64)
            .unwrap_or(u64::MAX);
        row.start_sample.saturating_add(slack)
    }

    /// Upper bound on the end of subdirectory `i`, from the one after it
    fn latest_end(&self, i: usize) -> u64 {
        if i + 1 < self.subdirectories.len() {
            self.latest_start(i + 1)
        } else {
            u64::MAX
        }
    }

    fn sample_rate(&self) -> Option<f64> {
        self.attributes.as_ref().map(|a| a.sample_rate)
    }

    /// Indexed subdirectories must not overlap
    fn verify(&self) -> IndexResult<()> {
        let mut last: Option<&SubdirectoryRow> = None;
        for row in self.rows().filter(|r| r.extent > 0) {
            if let Some(prev) = last {
                if prev.start_sample + prev.extent > row.start_sample {
                    return Err(IndexError::Overlap(format!(
                        "Overlapping samples found in subdirectory {} of {:?}",
                        row.name, self.channel_dir
                    )));
                }
            }
            last = Some(row);
        }
        Ok(())
    }

    fn compute_bounds(&self) -> Option<(u64, u64)> {
        let first = self.subdirectories.iter().find_map(|e| e.index.first_sample())?;
        let end = self.subdirectories.iter().rev().find_map(|e| e.index.end_sample())?;
        Some((first, end))
    }

    /// True if an unindexed subdirectory cannot reach `start`
    fn ends_before(&self, i: usize, start: u64) -> bool {
        !self.subdirectories[i].index.is_indexed() && self.latest_end(i) <= start
    }

    /// Index of the first subdirectory that may hold `start`
    fn first_candidate(&self, start: u64) -> usize {
        let mut i = self
            .subdirectories
            .partition_point(|e| e.row.start_sample < start)
            .saturating_sub(1);
        // an estimated start may sit below the real one
        while i > 0 && self.latest_start(i) > start {
            i -= 1;
        }
        i
    }

    /// Re-index subdirectory `i` if its listing moved, keeping root state in step
    fn refresh_on_read<S: BlockStore>(&mut self, store: &S, i: usize, options: &IndexOptions) -> IndexResult<()> {
        if self.subdirectories[i].refresh_if_needed(store, options)? {
            capture(&mut self.samples_per_file, &mut self.attributes, &self.subdirectories[i].index)?;
            self.verify()?;
            self.bounds = self.compute_bounds();
        }
        Ok(())
    }

    /// Continuous blocks within the inclusive range `[start, stop]`
    pub fn get_continuous_blocks<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        stop: u64,
        options: &IndexOptions,
    ) -> IndexResult<Fetch<Vec<ContinuousBlock>>> {
        let mut blocks = Vec::new();
        for i in self.first_candidate(start)..self.subdirectories.len() {
            if self.ends_before(i, start) {
                continue;
            }
            if self.subdirectories[i].row.start_sample > stop {
                break;
            }
            if !self.subdirectories[i].index.is_indexed() {
                return Ok(Fetch::Stale);
            }
            self.refresh_on_read(store, i, options)?;
            let entry = &self.subdirectories[i];
            if entry.row.extent == 0 {
                continue;
            }
            let row_end = entry.row.start_sample + entry.row.extent;
            let from = start.max(entry.row.start_sample);
            let to = stop.min(row_end - 1);
            if from > to {
                continue;
            }
            let found = ready!(entry.index.get_continuous_blocks(from, to));
            merge_blocks(&mut blocks, found)?;
        }
        Ok(Fetch::Ready(blocks))
    }

    /// Samples in `[start, stop)`; the range must be gap free
    pub fn get_continuous_vector<S: BlockStore>(
        &mut self,
        store: &S,
        start: u64,
        stop: u64,
        options: &IndexOptions,
    ) -> IndexResult<Fetch<SampleBuffer>> {
        let mut out: Option<SampleBuffer> = None;
        for i in self.first_candidate(start)..self.subdirectories.len() {
            if self.ends_before(i, start) {
                continue;
            }
            if self.subdirectories[i].row.start_sample >= stop {
                break;
            }
            if !self.subdirectories[i].index.is_indexed() {
                return Ok(Fetch::Stale);
            }
            self.refresh_on_read(store, i, options)?;
            let entry = &self.subdirectories[i];
            if entry.row.extent == 0 {
                continue;
            }
            let row_end = entry.row.start_sample + entry.row.extent;
            if row_end <= start {
                continue;
            }
            let from = start.max(entry.row.start_sample);
            let to = stop.min(row_end);
            let piece = ready!(entry.index.get_continuous_vector(store, from, to)?);
            out = Some(append_continuous(out, piece)?);
        }

        match out {
            Some(buffer) if buffer.start_sample == start && buffer.end_sample() == stop => {
                Ok(Fetch::Ready(buffer))
            }
            Some(buffer) => Err(IndexError::Gap(format!(
                "Requested {}..{} but {:?} holds only {}..{}",
                start,
                stop,
                self.channel_dir,
                buffer.start_sample,
                buffer.end_sample()
            ))),
            None => Err(IndexError::Gap(format!(
                "No data for {}..{} in {:?}",
                start, stop, self.channel_dir
            ))),
        }
    }
}

/// Record samples_per_file and attributes from a freshly indexed subdirectory
fn capture(
    samples_per_file: &mut Option<u64>,
    attributes: &mut Option<BlockAttributes>,
    index: &SubdirectoryIndex,
) -> IndexResult<()> {
    if let Some(spf) = index.samples_per_file() {
        match *samples_per_file {
            None => *samples_per_file = Some(spf),
            Some(known) if known != spf => {
                return Err(IndexError::Config(format!(
                    "Samples per file changed from {} to {} in subdirectory {}",
                    known,
                    spf,
                    index.name()
                )));
            }
            Some(_) => {}
        }
    }
    if attributes.is_none() {
        *attributes = index.attributes().cloned();
    }
    Ok(())
}

/// Concatenate `next` onto `acc`; the two must be sample-adjacent
pub(crate) fn append_continuous(
    acc: Option<SampleBuffer>,
    next: SampleBuffer,
) -> IndexResult<SampleBuffer> {
    match acc {
        None => Ok(next),
        Some(mut buffer) => {
            if buffer.end_sample() != next.start_sample {
                return Err(IndexError::Gap(format!(
                    "Data ends at {} but next piece starts at {}",
                    buffer.end_sample(),
                    next.start_sample
                )));
            }
            buffer.extend_from_slice(next.as_bytes());
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        encode_samples, BlockFileWriter, ChannelWriter, FileBlockStore, SampleFormat, ScalarType,
        WriterConfig,
    };
    use tempfile::tempdir;

    const START: u64 = 1_700_000_000 * 100;

    fn config() -> WriterConfig {
        WriterConfig {
            samples_per_file: 40,
            files_per_subdirectory: 10,
            start_sample: START,
            sample_rate: 100.0,
            uuid: Some("top-test".to_string()),
            format: SampleFormat::real(ScalarType::I16),
            subdirectory_cadence_secs: None,
            max_subdirectories: None,
        }
    }

    fn write(root: &Path, runs: &[(u64, u64)]) {
        let mut writer = ChannelWriter::create(root, "ch", config()).unwrap();
        for &(start, count) in runs {
            let data: Vec<i16> = (start..start + count).map(|s| (s - START) as i16).collect();
            writer.write(&data, Some(start)).unwrap();
        }
        writer.close().unwrap();
    }

    fn refreshed(root: &Path) -> TopLevelDirIndex {
        let mut index = TopLevelDirIndex::new(root, "ch");
        index
            .refresh(&FileBlockStore::default(), RefreshScope::HighLevel, &IndexOptions::default())
            .unwrap();
        index
    }

    #[test]
    fn test_high_level_bounds() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 1000)]);
        let index = refreshed(dir.path());

        // 25 files over 3 subdirectories
        assert_eq!(index.rows().count(), 3);
        assert_eq!(index.bounds(), Some((START, START + 1000)));
        assert_eq!(index.samples_per_file(), Some(40));
        assert_eq!(index.attributes().unwrap().uuid, "top-test");

        // the middle subdirectory is only estimated
        let middle = index.rows().nth(1).unwrap();
        assert_eq!(middle.extent, 0);
        assert_eq!(middle.start_sample, START + 400);
    }

    #[test]
    fn test_stale_then_low_level() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 1000)]);
        let store = FileBlockStore::default();
        let options = IndexOptions::default();
        let mut index = refreshed(dir.path());

        let fetch = index
            .get_continuous_blocks(&store, START, START + 999, &options)
            .unwrap();
        assert!(fetch.is_stale());

        index
            .refresh(&store, RefreshScope::LowLevel { start: START, length: 1000 }, &options)
            .unwrap();
        let blocks = index
            .get_continuous_blocks(&store, START, START + 999, &options)
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(blocks, vec![ContinuousBlock::new(START, 1000)]);
    }

    #[test]
    fn test_vector_across_subdirectories() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 1000)]);
        let store = FileBlockStore::default();
        let options = IndexOptions::default();
        let mut index = refreshed(dir.path());
        index
            .refresh(&store, RefreshScope::LowLevel { start: START + 350, length: 100 }, &options)
            .unwrap();

        let buffer = index
            .get_continuous_vector(&store, START + 350, START + 450, &options)
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(buffer.len(), 100);
        let values = buffer.subchannel_values(0).unwrap();
        assert_eq!(values[0], 350.0);
        assert_eq!(values[99], 449.0);
    }

    #[test]
    fn test_gap_between_subdirectories() {
        let dir = tempdir().unwrap();
        // second run starts 20 s later, in its own subdirectory
        write(dir.path(), &[(START, 400), (START + 2400, 40)]);
        let store = FileBlockStore::default();
        let options = IndexOptions::default();
        let mut index = refreshed(dir.path());
        index
            .refresh(&store, RefreshScope::LowLevel { start: START, length: 2440 }, &options)
            .unwrap();

        assert_eq!(index.bounds(), Some((START, START + 2440)));
        let blocks = index
            .get_continuous_blocks(&store, START, START + 3000, &options)
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(
            blocks,
            vec![ContinuousBlock::new(START, 400), ContinuousBlock::new(START + 2400, 40)]
        );

        let result = index.get_continuous_vector(&store, START + 390, START + 2410, &options);
        assert!(matches!(result, Err(IndexError::Gap(_))));
    }

    #[test]
    fn test_removed_subdirectory_shrinks_bounds() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 1000)]);
        let store = FileBlockStore::default();
        let options = IndexOptions::default();
        let mut index = refreshed(dir.path());

        let oldest = index.first_subdirectory().unwrap().to_string();
        std::fs::remove_dir_all(dir.path().join("ch").join(oldest)).unwrap();

        index.refresh(&store, RefreshScope::HighLevel, &options).unwrap();
        assert_eq!(index.bounds(), Some((START + 400, START + 1000)));
        assert_eq!(index.rows().count(), 2);
    }

    #[test]
    fn test_select_uses_tolerance() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 1000)]);
        let mut index = refreshed(dir.path());
        index
            .refresh(
                &FileBlockStore::default(),
                RefreshScope::LowLevel { start: START, length: 1000 },
                &IndexOptions::default(),
            )
            .unwrap();

        // rows: [START, 400) [START+400, 400) [START+800, 200)
        assert_eq!(index.select(START + 100, 50, 1.001), vec![0]);
        assert_eq!(index.select(START + 390, 20, 1.001), vec![0, 1]);
        assert_eq!(index.select(START + 900, 10, 1.001), vec![2]);
    }

    #[test]
    fn test_offset_start_reads_unindexed_middle() {
        let dir = tempdir().unwrap();
        // half a second in: real subdirectory starts sit 50 past their names
        write(dir.path(), &[(START + 50, 1600)]);
        let store = FileBlockStore::default();
        let options = IndexOptions::default();
        let mut index = refreshed(dir.path());

        assert_eq!(index.bounds(), Some((START + 50, START + 1650)));
        let estimates: Vec<u64> = index.rows().map(|r| r.start_sample).collect();
        assert_eq!(estimates, vec![START + 50, START + 400, START + 800, START + 1250]);

        let fetch = index
            .get_continuous_vector(&store, START + 820, START + 830, &options)
            .unwrap();
        assert!(fetch.is_stale());

        // S+820 lies in the second subdirectory, whose estimate ends at S+800
        assert_eq!(index.select(START + 820, 10, 1.001), vec![1, 2]);
        index
            .refresh(&store, RefreshScope::LowLevel { start: START + 820, length: 10 }, &options)
            .unwrap();

        let buffer = index
            .get_continuous_vector(&store, START + 820, START + 830, &options)
            .unwrap()
            .ready()
            .unwrap();
        let values = buffer.subchannel_values(0).unwrap();
        assert_eq!(values[0], 820.0);
        assert_eq!(values[9], 829.0);

        let blocks = index
            .get_continuous_blocks(&store, START + 820, START + 829, &options)
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(blocks, vec![ContinuousBlock::new(START + 820, 10)]);
    }

    #[test]
    fn test_first_candidate_steps_back_over_estimates() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START + 50, 1600)]);
        let index = refreshed(dir.path());

        // the third row is only estimated, so S+820 may belong to the second
        assert_eq!(index.first_candidate(START + 820), 1);
        // the first row is exact
        assert_eq!(index.first_candidate(START + 420), 0);
        assert!(!index.ends_before(1, START + 820));
        assert!(index.ends_before(1, START + 1300));
    }

    #[test]
    fn test_samples_per_file_change_on_read_is_error() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 1000)]);
        let store = FileBlockStore::new(std::time::Duration::from_secs(60));
        let options = IndexOptions::default();

        // a later subdirectory whose only file is still open
        let channel_dir = dir.path().join("ch");
        let first = layout::list_block_files(&channel_dir.join("2023-11-14T22:13:20")).unwrap();
        let mut attrs = store
            .read_attrs(&channel_dir.join("2023-11-14T22:13:20").join(&first[0]))
            .unwrap();
        attrs.samples_per_file = 50;
        let subdir = channel_dir.join(layout::subdirectory_name(1_700_000_020).unwrap());
        std::fs::create_dir(&subdir).unwrap();
        let path = subdir.join(layout::block_file_name(START + 2000, 100.0));
        let mut odd = BlockFileWriter::create(&path, &attrs).unwrap();
        odd.append(&encode_samples(&[0i16; 5]), START + 2000).unwrap();

        let mut index = TopLevelDirIndex::new(dir.path(), "ch");
        index.refresh(&store, RefreshScope::HighLevel, &options).unwrap();
        assert_eq!(index.rows().count(), 4);
        assert_eq!(index.bounds(), Some((START, START + 1000)));

        odd.close().unwrap();
        let result = index.get_continuous_blocks(&store, START + 2000, START + 2010, &options);
        assert!(matches!(result, Err(IndexError::Config(_))));
    }

    #[test]
    fn test_order_key() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[(START, 100)]);
        let index = refreshed(dir.path());
        let (start, name, root) = index.order_key();
        assert_eq!(start, START);
        assert_eq!(name, "2023-11-14T22:13:20");
        assert_eq!(root, dir.path());

        let empty = TopLevelDirIndex::new(dir.path(), "missing");
        assert_eq!(empty.order_key().0, u64::MAX);
    }
}
