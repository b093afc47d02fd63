//! Directory layout conventions
//!
//! ```text
//! <root>/<channel>/<YYYY-MM-DDTHH:MM:SS>/rf@<secs>.<millis>.drf
//! <root>/<channel>/metadata@<secs>.json
//! ```
//!
//! Subdirectory and file names are zero padded so that lexicographic order
//! is chronological order.

use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

const SUBDIRECTORY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Extension of block files
pub const BLOCK_FILE_EXTENSION: &str = "drf";

/// Extension of channel metadata files
pub const METADATA_FILE_EXTENSION: &str = "json";

fn subdirectory_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}$").expect("valid subdirectory regex")
    })
}

fn block_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^rf@(\d{10})\.(\d{3})\.drf$").expect("valid block file regex"))
}

fn metadata_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^metadata@(\d+)\.json$").expect("valid metadata file regex"))
}

/// Name of the subdirectory starting at `unix_secs`
pub fn subdirectory_name(unix_secs: i64) -> StorageResult<String> {
    let time = DateTime::<Utc>::from_timestamp(unix_secs, 0).ok_or_else(|| {
        StorageError::InvalidInput(format!("Timestamp {} out of range", unix_secs))
    })?;
    Ok(time.format(SUBDIRECTORY_FORMAT).to_string())
}

/// Unix seconds encoded in a subdirectory name
pub fn parse_subdirectory_name(name: &str) -> Option<i64> {
    if !subdirectory_regex().is_match(name) {
        return None;
    }
    NaiveDateTime::parse_from_str(name, SUBDIRECTORY_FORMAT)
        .ok()
        .map(|t| t.and_utc().timestamp())
}

/// Unix time of `sample` as (seconds, milliseconds)
pub fn sample_to_unix(sample: u64, sample_rate: f64) -> (i64, u32) {
    if sample_rate.fract() == 0.0 && sample_rate >= 1.0 {
        let rate = sample_rate as u64;
        let secs = sample / rate;
        let millis = (sample % rate) * 1000 / rate;
        (secs as i64, millis as u32)
    } else {
        let t = sample as f64 / sample_rate;
        let secs = t.floor();
        let millis = (((t - secs) * 1000.0).floor() as u32).min(999);
        (secs as i64, millis)
    }
}

/// First sample at or after `unix_secs`
pub fn unix_to_sample(unix_secs: i64, sample_rate: f64) -> u64 {
    if unix_secs <= 0 {
        return 0;
    }
    if sample_rate.fract() == 0.0 && sample_rate >= 1.0 {
        unix_secs as u64 * sample_rate as u64
    } else {
        (unix_secs as f64 * sample_rate).ceil() as u64
    }
}

/// Name of the block file whose first sample is `sample`
pub fn block_file_name(sample: u64, sample_rate: f64) -> String {
    let (secs, millis) = sample_to_unix(sample, sample_rate);
    format!("rf@{:010}.{:03}.{}", secs, millis, BLOCK_FILE_EXTENSION)
}

/// (seconds, milliseconds) encoded in a block file name
pub fn parse_block_file_name(name: &str) -> Option<(i64, u32)> {
    let caps = block_file_regex().captures(name)?;
    let secs = caps.get(1)?.as_str().parse().ok()?;
    let millis = caps.get(2)?.as_str().parse().ok()?;
    Some((secs, millis))
}

/// Name of the channel metadata file taking effect at `unix_secs`
pub fn metadata_file_name(unix_secs: i64) -> String {
    format!("metadata@{:010}.{}", unix_secs, METADATA_FILE_EXTENSION)
}

/// Unix seconds encoded in a metadata file name
pub fn parse_metadata_file_name(name: &str) -> Option<i64> {
    metadata_file_regex().captures(name)?.get(1)?.as_str().parse().ok()
}

/// Entry names of `dir`; a directory that vanished lists as empty
fn read_dir_names(dir: &Path, want_dirs: bool) -> StorageResult<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::Io(e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(StorageError::Io(e)),
        };
        let is_dir = match entry.file_type() {
            Ok(t) => t.is_dir(),
            Err(_) => continue,
        };
        if is_dir != want_dirs {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Block file names in a subdirectory, sorted
pub fn list_block_files(subdir: &Path) -> StorageResult<Vec<String>> {
    Ok(read_dir_names(subdir, false)?
        .into_iter()
        .filter(|name| parse_block_file_name(name).is_some())
        .collect())
}

/// Metadata files of a channel directory as (unix seconds, name), oldest first
pub fn list_metadata_files(channel_dir: &Path) -> StorageResult<Vec<(i64, String)>> {
    let mut files: Vec<(i64, String)> = read_dir_names(channel_dir, false)?
        .into_iter()
        .filter_map(|name| parse_metadata_file_name(&name).map(|secs| (secs, name)))
        .collect();
    files.sort();
    Ok(files)
}

/// Every timestamp-named subdirectory of a channel directory, sorted
pub fn list_subdirectory_names(channel_dir: &Path) -> StorageResult<Vec<String>> {
    Ok(read_dir_names(channel_dir, true)?
        .into_iter()
        .filter(|name| parse_subdirectory_name(name).is_some())
        .collect())
}

/// Subdirectories of a channel directory holding at least one block file, sorted
pub fn list_subdirectories(channel_dir: &Path) -> StorageResult<Vec<String>> {
    let mut result = Vec::new();
    for name in list_subdirectory_names(channel_dir)? {
        if !list_block_files(&channel_dir.join(&name))?.is_empty() {
            result.push(name);
        }
    }
    Ok(result)
}

/// Channel names under a storage root, sorted.
///
/// A channel is a directory holding at least one timestamp-named subdirectory.
pub fn list_channels(root: &Path) -> StorageResult<Vec<String>> {
    let mut result = Vec::new();
    for name in read_dir_names(root, true)? {
        let has_subdir = read_dir_names(&root.join(&name), true)?
            .iter()
            .any(|sub| parse_subdirectory_name(sub).is_some());
        if has_subdir {
            result.push(name);
        }
    }
    Ok(result)
}

/// Cheap summary of a subdirectory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryStamp {
    pub file_count: usize,
    /// Modification time of the last (newest) block file
    pub last_mtime: Option<SystemTime>,
}

impl DirectoryStamp {
    /// Same file count and last mtime within `tolerance`
    pub fn matches(&self, other: &DirectoryStamp, tolerance: Duration) -> bool {
        if self.file_count != other.file_count {
            return false;
        }
        match (self.last_mtime, other.last_mtime) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                let diff = a.duration_since(b).unwrap_or_else(|e| e.duration());
                diff < tolerance
            }
            _ => false,
        }
    }
}

/// Stamp a subdirectory from its current listing
pub fn stamp_subdirectory(subdir: &Path) -> StorageResult<DirectoryStamp> {
    let files = list_block_files(subdir)?;
    let last_mtime = match files.last() {
        Some(name) => match std::fs::metadata(subdir.join(name)) {
            Ok(meta) => Some(meta.modified()?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StorageError::Io(e)),
        },
        None => None,
    };
    Ok(DirectoryStamp {
        file_count: files.len(),
        last_mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_subdirectory_name_roundtrip() {
        let name = subdirectory_name(1_700_000_000).unwrap();
        assert_eq!(name, "2023-11-14T22:13:20");
        assert_eq!(parse_subdirectory_name(&name), Some(1_700_000_000));

        assert_eq!(parse_subdirectory_name("2023-11-14 22:13:20"), None);
        assert_eq!(parse_subdirectory_name("metadata"), None);
    }

    #[test]
    fn test_metadata_files_listed_by_time() {
        let dir = tempdir().unwrap();
        for secs in [1_700_000_100, 1_700_000_000, 999] {
            std::fs::write(dir.path().join(metadata_file_name(secs)), "{}").unwrap();
        }
        std::fs::write(dir.path().join("metadata@1700000050.h5"), "").unwrap();
        std::fs::create_dir(dir.path().join("2023-11-14T22:13:20")).unwrap();

        let files = list_metadata_files(dir.path()).unwrap();
        let secs: Vec<i64> = files.iter().map(|(s, _)| *s).collect();
        assert_eq!(secs, vec![999, 1_700_000_000, 1_700_000_100]);
        assert_eq!(files[1].1, "metadata@1700000000.json");
        assert_eq!(parse_metadata_file_name("rf@1700000000.000.drf"), None);
    }

    #[test]
    fn test_block_file_name() {
        // 100 Hz: sample 170000000025 is 0.25 s past the second
        let name = block_file_name(170_000_000_025, 100.0);
        assert_eq!(name, "rf@1700000000.250.drf");
        assert_eq!(parse_block_file_name(&name), Some((1_700_000_000, 250)));
        assert_eq!(parse_block_file_name("rf@1700000000.250.h5"), None);
    }

    #[test]
    fn test_block_file_names_sort_chronologically() {
        let a = block_file_name(999_999_999 * 100, 100.0);
        let b = block_file_name(1_000_000_000 * 100, 100.0);
        assert!(a < b);
    }

    #[test]
    fn test_sample_time_conversion() {
        assert_eq!(sample_to_unix(1_000_050, 100.0), (10_000, 500));
        assert_eq!(unix_to_sample(10_000, 100.0), 1_000_000);

        // non-integral rate
        assert_eq!(sample_to_unix(5, 2.5), (2, 0));
        assert_eq!(sample_to_unix(3, 0.5), (6, 0));
        assert_eq!(unix_to_sample(2, 2.5), 5);
    }

    #[test]
    fn test_listings() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let channel = root.join("ch0");
        let sub_a = channel.join("2023-11-14T22:13:20");
        let sub_b = channel.join("2023-11-14T22:13:30");
        let empty = channel.join("2023-11-14T22:13:40");
        std::fs::create_dir_all(&sub_a).unwrap();
        std::fs::create_dir_all(&sub_b).unwrap();
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::create_dir_all(root.join("not_a_channel/misc")).unwrap();

        std::fs::write(sub_a.join("rf@1700000000.400.drf"), b"x").unwrap();
        std::fs::write(sub_a.join("rf@1700000000.000.drf"), b"x").unwrap();
        std::fs::write(sub_a.join("notes.txt"), b"x").unwrap();
        std::fs::write(sub_b.join("rf@1700000010.000.drf"), b"x").unwrap();

        assert_eq!(list_channels(root).unwrap(), vec!["ch0".to_string()]);
        assert_eq!(
            list_subdirectories(&channel).unwrap(),
            vec!["2023-11-14T22:13:20".to_string(), "2023-11-14T22:13:30".to_string()]
        );
        assert_eq!(
            list_block_files(&sub_a).unwrap(),
            vec!["rf@1700000000.000.drf".to_string(), "rf@1700000000.400.drf".to_string()]
        );

        let stamp = stamp_subdirectory(&sub_a).unwrap();
        assert_eq!(stamp.file_count, 2);
        assert!(stamp.last_mtime.is_some());
    }

    #[test]
    fn test_vanished_directory_lists_empty() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone");
        assert!(list_block_files(&gone).unwrap().is_empty());
        assert!(list_subdirectories(&gone).unwrap().is_empty());
        assert_eq!(stamp_subdirectory(&gone).unwrap(), DirectoryStamp::default());
    }

    #[test]
    fn test_stamp_matching() {
        let now = SystemTime::now();
        let a = DirectoryStamp { file_count: 3, last_mtime: Some(now) };
        let b = DirectoryStamp {
            file_count: 3,
            last_mtime: Some(now + Duration::from_millis(500)),
        };
        let c = DirectoryStamp { file_count: 4, last_mtime: Some(now) };
        let tolerance = Duration::from_secs(2);

        assert!(a.matches(&b, tolerance));
        assert!(b.matches(&a, tolerance));
        assert!(!a.matches(&c, tolerance));
        assert!(!a.matches(&DirectoryStamp::default(), tolerance));
    }
}
