//! Channel writer
//!
//! Writes one channel into the ring-buffer directory layout:
//! - a new block file when the current one is full
//! - a new subdirectory after `files_per_subdirectory` files, or when a
//!   cadence boundary is crossed
//! - every writer session starts in a fresh subdirectory, so only the last
//!   file of a subdirectory can ever be partially filled
//!
//! Sample indices are absolute (`unix_seconds * sample_rate`).

use crate::storage::block_store::{BlockStore, BlockWriter, FileBlockStore};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::layout;
use crate::storage::types::{encode_samples, BlockAttributes, Sample, SampleFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration for a writer session
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub samples_per_file: u64,
    pub files_per_subdirectory: u64,
    /// First sample this session may write
    pub start_sample: u64,
    pub sample_rate: f64,
    /// Generated when not given
    pub uuid: Option<String>,
    pub format: SampleFormat,
    /// Start a new subdirectory at every multiple of this many seconds
    pub subdirectory_cadence_secs: Option<u64>,
    /// Keep at most this many subdirectories, deleting the oldest
    pub max_subdirectories: Option<usize>,
}

impl WriterConfig {
    pub fn new(format: SampleFormat, sample_rate: f64, start_sample: u64) -> Self {
        Self {
            samples_per_file: 1_000_000,
            files_per_subdirectory: 100,
            start_sample,
            sample_rate,
            uuid: None,
            format,
            subdirectory_cadence_secs: None,
            max_subdirectories: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> StorageResult<()> {
        if self.samples_per_file == 0 || self.files_per_subdirectory == 0 {
            return Err(StorageError::Config(
                "samples_per_file and files_per_subdirectory must be positive".into(),
            ));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(StorageError::Config(format!(
                "Illegal sample_rate {}",
                self.sample_rate
            )));
        }
        if let Some(cadence) = self.subdirectory_cadence_secs {
            let file_cadence = self.samples_per_file as f64 / self.sample_rate;
            if (cadence as f64) <= file_cadence {
                return Err(StorageError::Config(format!(
                    "Subdirectory cadence {} s must exceed the file cadence {} s",
                    cadence, file_cadence
                )));
            }
        }
        if self.max_subdirectories == Some(0) {
            return Err(StorageError::Config(
                "max_subdirectories must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct OpenBlock<W> {
    path: PathBuf,
    writer: W,
}

/// Writes one channel of one storage root
pub struct ChannelWriter<S: BlockStore = FileBlockStore> {
    store: S,
    channel_dir: PathBuf,
    config: WriterConfig,
    uuid: String,
    init_utc_timestamp: i64,
    current: Option<OpenBlock<S::Writer>>,
    /// (path, start second) of the subdirectory being filled
    subdirectory: Option<(PathBuf, i64)>,
    files_in_subdirectory: u64,
    sequence_num: u64,
    next_sample: u64,
    samples_written: u64,
    gap_samples: u64,
}

impl ChannelWriter<FileBlockStore> {
    /// Start a writer session for `channel` under `root` with the local block store
    pub fn create(root: impl AsRef<Path>, channel: &str, config: WriterConfig) -> StorageResult<Self> {
        Self::with_store(FileBlockStore::default(), root, channel, config)
    }
}

impl<S: BlockStore> ChannelWriter<S> {
    pub fn with_store(
        store: S,
        root: impl AsRef<Path>,
        channel: &str,
        config: WriterConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        if channel.is_empty() || channel.contains(std::path::is_separator) {
            return Err(StorageError::Config(format!("Illegal channel name {:?}", channel)));
        }

        let channel_dir = root.as_ref().join(channel);
        std::fs::create_dir_all(&channel_dir)?;

        let uuid = config
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            channel = %channel,
            dir = ?channel_dir,
            start_sample = config.start_sample,
            uuid = %uuid,
            "Starting channel writer"
        );

        Ok(Self {
            store,
            channel_dir,
            next_sample: config.start_sample,
            config,
            uuid,
            init_utc_timestamp: chrono::Utc::now().timestamp(),
            current: None,
            subdirectory: None,
            files_in_subdirectory: 0,
            sequence_num: 0,
            samples_written: 0,
            gap_samples: 0,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn channel_dir(&self) -> &Path {
        &self.channel_dir
    }

    /// Write a channel metadata file taking effect at `unix_secs`
    pub fn write_metadata(&self, unix_secs: i64, values: &serde_json::Value) -> StorageResult<PathBuf> {
        write_metadata_file(&self.channel_dir, unix_secs, values)
    }

    /// Next sample that may be written
    pub fn next_sample(&self) -> u64 {
        self.next_sample
    }

    /// Total samples written this session
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Total samples skipped over by gaps this session
    pub fn gap_samples(&self) -> u64 {
        self.gap_samples
    }

    /// Write one continuous run starting at `at` (default: the next sample)
    pub fn write<T: Sample>(&mut self, data: &[T], at: Option<u64>) -> StorageResult<()> {
        let at = at.unwrap_or(self.next_sample);
        self.write_blocks(data, &[at], &[0])
    }

    /// Write several continuous runs in one call.
    ///
    /// Run `i` starts at global sample `global_samples[i]` and at sample
    /// `data_offsets[i]` of `data`.
    pub fn write_blocks<T: Sample>(
        &mut self,
        data: &[T],
        global_samples: &[u64],
        data_offsets: &[u64],
    ) -> StorageResult<()> {
        let count = self.check_data(data)?;
        self.check_blocks(count, global_samples, data_offsets)?;

        let bytes = encode_samples(data);
        let sample_size = self.config.format.sample_size();

        for (i, (&at, &offset)) in global_samples.iter().zip(data_offsets).enumerate() {
            let end = data_offsets.get(i + 1).copied().unwrap_or(count);
            let run = &bytes[offset as usize * sample_size..end as usize * sample_size];
            self.write_run(run, at)?;
        }
        Ok(())
    }

    /// Seal the open file and end the session
    pub fn close(mut self) -> StorageResult<()> {
        self.close_current()?;
        info!(
            dir = ?self.channel_dir,
            samples = self.samples_written,
            gaps = self.gap_samples,
            "Closed channel writer"
        );
        Ok(())
    }

    fn check_data<T: Sample>(&self, data: &[T]) -> StorageResult<u64> {
        let format = &self.config.format;
        if T::SCALAR != format.scalar {
            return Err(StorageError::InvalidInput(format!(
                "Data type {} does not match channel type {}",
                T::SCALAR,
                format.scalar
            )));
        }
        let per_sample = format.values_per_sample();
        if data.len() % per_sample != 0 {
            return Err(StorageError::InvalidInput(format!(
                "Data length {} is not a multiple of {} values per sample",
                data.len(),
                per_sample
            )));
        }
        Ok((data.len() / per_sample) as u64)
    }

    fn check_blocks(&self, count: u64, global_samples: &[u64], data_offsets: &[u64]) -> StorageResult<()> {
        if global_samples.is_empty() || global_samples.len() != data_offsets.len() {
            return Err(StorageError::InvalidInput(format!(
                "Index arrays must be non-empty and equal length, got {} and {}",
                global_samples.len(),
                data_offsets.len()
            )));
        }
        if data_offsets[0] != 0 {
            return Err(StorageError::InvalidInput(format!(
                "First data offset must be 0, not {}",
                data_offsets[0]
            )));
        }
        if global_samples[0] < self.next_sample {
            return Err(StorageError::InvalidInput(format!(
                "Request index {} before first expected index {}",
                global_samples[0], self.next_sample
            )));
        }
        for i in 1..data_offsets.len() {
            if data_offsets[i] <= data_offsets[i - 1] || data_offsets[i] >= count {
                return Err(StorageError::InvalidInput(format!(
                    "Data offsets must increase and stay below {}: {:?}",
                    count, data_offsets
                )));
            }
            let run = data_offsets[i] - data_offsets[i - 1];
            if global_samples[i] < global_samples[i - 1] + run {
                return Err(StorageError::InvalidInput(format!(
                    "Global sample {} overlaps the previous run ending at {}",
                    global_samples[i],
                    global_samples[i - 1] + run
                )));
            }
        }
        Ok(())
    }

    fn write_run(&mut self, bytes: &[u8], mut at: u64) -> StorageResult<()> {
        let sample_size = self.config.format.sample_size();
        let mut pos = 0;

        if at > self.next_sample {
            self.gap_samples += at - self.next_sample;
        }

        while pos < bytes.len() {
            if self.current.is_none() {
                self.open_block(at)?;
            }
            let Some(open) = self.current.as_mut() else {
                break;
            };

            let left = ((bytes.len() - pos) / sample_size) as u64;
            let n = left.min(open.writer.remaining());
            let chunk = &bytes[pos..pos + n as usize * sample_size];
            open.writer.append(chunk, at)?;

            pos += chunk.len();
            at += n;
            self.samples_written += n;
            self.next_sample = at;

            if open.writer.remaining() == 0 {
                self.close_current()?;
            }
        }
        Ok(())
    }

    fn open_block(&mut self, at: u64) -> StorageResult<()> {
        let (secs, _) = layout::sample_to_unix(at, self.config.sample_rate);
        if self.needs_new_subdirectory(secs) {
            self.open_subdirectory(secs)?;
        }
        let subdir = match &self.subdirectory {
            Some((path, _)) => path.clone(),
            None => return Err(StorageError::InvalidInput("No open subdirectory".into())),
        };

        let path = subdir.join(layout::block_file_name(at, self.config.sample_rate));
        let attrs = BlockAttributes {
            sample_rate: self.config.sample_rate,
            samples_per_file: self.config.samples_per_file,
            files_per_subdirectory: self.config.files_per_subdirectory,
            format: self.config.format,
            uuid: self.uuid.clone(),
            sequence_num: self.sequence_num,
            init_utc_timestamp: self.init_utc_timestamp,
        };
        let writer = self.store.create(&path, &attrs)?;
        debug!(path = ?path, sample = at, "Opened block file");

        self.sequence_num += 1;
        self.files_in_subdirectory += 1;
        self.current = Some(OpenBlock { path, writer });
        Ok(())
    }

    fn needs_new_subdirectory(&self, file_secs: i64) -> bool {
        let Some((_, start_secs)) = self.subdirectory else {
            return true;
        };
        if self.files_in_subdirectory >= self.config.files_per_subdirectory {
            return true;
        }
        match self.config.subdirectory_cadence_secs {
            Some(cadence) => {
                let cadence = cadence as i64;
                file_secs.div_euclid(cadence) != start_secs.div_euclid(cadence)
            }
            None => false,
        }
    }

    fn open_subdirectory(&mut self, secs: i64) -> StorageResult<()> {
        let name = layout::subdirectory_name(secs)?;
        let path = self.channel_dir.join(&name);
        if let Err(e) = std::fs::create_dir(&path) {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(StorageError::InvalidInput(format!(
                    "Subdirectory {:?} already exists",
                    path
                )));
            }
            return Err(StorageError::Io(e));
        }
        info!(subdirectory = %name, "Rotated to new subdirectory");

        self.subdirectory = Some((path, secs));
        self.files_in_subdirectory = 0;
        self.recycle(&name)
    }

    /// Delete the oldest subdirectories beyond `max_subdirectories`
    fn recycle(&self, current: &str) -> StorageResult<()> {
        let Some(max) = self.config.max_subdirectories else {
            return Ok(());
        };
        let names = layout::list_subdirectory_names(&self.channel_dir)?;
        if names.len() <= max {
            return Ok(());
        }
        let excess = names.len() - max;
        for name in names.iter().filter(|n| n.as_str() != current).take(excess) {
            let path = self.channel_dir.join(name);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => info!(subdirectory = %name, "Recycled subdirectory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(subdirectory = %name, error = %e, "Failed to recycle subdirectory"),
            }
        }
        Ok(())
    }

    fn close_current(&mut self) -> StorageResult<()> {
        if let Some(open) = self.current.take() {
            debug!(path = ?open.path, "Sealing block file");
            open.writer.close()?;
        }
        Ok(())
    }
}

/// Write `values` as the metadata file of `channel_dir` for `unix_secs`.
///
/// Values must be a JSON object; an existing file is never replaced.
pub fn write_metadata_file(
    channel_dir: &Path,
    unix_secs: i64,
    values: &serde_json::Value,
) -> StorageResult<PathBuf> {
    if !values.is_object() {
        return Err(StorageError::InvalidInput(
            "Channel metadata must be a JSON object".into(),
        ));
    }
    let path = channel_dir.join(layout::metadata_file_name(unix_secs));
    let content =
        serde_json::to_vec_pretty(values).map_err(|e| StorageError::Serialization(e.to_string()))?;

    let mut file = match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(StorageError::InvalidInput(format!(
                "Metadata file {:?} already exists",
                path
            )));
        }
        Err(e) => return Err(StorageError::Io(e)),
    };
    std::io::Write::write_all(&mut file, &content)?;
    file.sync_all()?;
    info!(path = ?path, "Wrote channel metadata");
    Ok(path)
}
