//! Block file format for rfstore
//!
//! A block file holds up to `samples_per_file` samples of one channel plus a
//! sparse index mapping each continuous run to its in-file position.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "DRFB"               │
//! │   version: u16                          │
//! │   flags: u8 (bit 0 = sealed)            │
//! │   reserved: u8                          │
//! │   samples_per_file: u64                 │
//! │   samples_written: u64                  │
//! │   index_rows: u32                       │
//! │   attrs_len: u32                        │
//! │   sample_size: u32                      │
//! │   index_checksum: u32                   │
//! │   reserved: [u8; 20]                    │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ ATTRIBUTES (bincode, attrs_len bytes)   │
//! ├─────────────────────────────────────────┤
//! │ DATA (preallocated)                     │
//! │   samples_per_file * sample_size bytes  │
//! │   packed, gaps take no space            │
//! ├─────────────────────────────────────────┤
//! │ INDEX ROWS                              │
//! │   For each row:                         │
//! │     global_sample: u64                  │
//! │     in_file_offset: u64                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Writers update data first, then index rows, then the header. A reader
//! that sees a valid header therefore always finds at least `index_rows`
//! rows and `samples_written` samples on disk.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlockAttributes, BlockIndex, IndexRow};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for block file identification
const BLOCK_MAGIC: [u8; 4] = *b"DRFB";

/// Current block format version
const BLOCK_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Size of one index row in bytes
const ROW_SIZE: usize = 16;

const FLAG_SEALED: u8 = 0b0000_0001;

/// Block file header
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub version: u16,
    /// Set once the writer has closed the file
    pub sealed: bool,
    /// Capacity in samples
    pub samples_per_file: u64,
    /// Samples stored so far
    pub samples_written: u64,
    /// Number of rows in the index region
    pub index_rows: u32,
    /// Length of the bincode attribute section
    pub attrs_len: u32,
    /// Bytes per sample
    pub sample_size: u32,
    /// CRC32 over the first `index_rows` rows
    pub index_checksum: u32,
}

impl BlockHeader {
    fn new(samples_per_file: u64, attrs_len: u32, sample_size: u32) -> Self {
        Self {
            version: BLOCK_VERSION,
            sealed: false,
            samples_per_file,
            samples_written: 0,
            index_rows: 0,
            attrs_len,
            sample_size,
            index_checksum: crc32fast::hash(&[]),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&BLOCK_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = if self.sealed { FLAG_SEALED } else { 0 };
        buf[8..16].copy_from_slice(&self.samples_per_file.to_le_bytes());
        buf[16..24].copy_from_slice(&self.samples_written.to_le_bytes());
        buf[24..28].copy_from_slice(&self.index_rows.to_le_bytes());
        buf[28..32].copy_from_slice(&self.attrs_len.to_le_bytes());
        buf[32..36].copy_from_slice(&self.sample_size.to_le_bytes());
        buf[36..40].copy_from_slice(&self.index_checksum.to_le_bytes());
        // bytes 40-59 reserved

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes read out of `path`
    pub fn from_bytes(buf: &[u8], path: &Path) -> StorageResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StorageError::Corruption {
                path: path.to_path_buf(),
                reason: format!("File too small for header: {} bytes", buf.len()),
            });
        }

        let stored_checksum = read_u32(buf, 60);
        let computed_checksum = crc32fast::hash(&buf[0..60]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::Corruption {
                path: path.to_path_buf(),
                reason: format!(
                    "Header checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            });
        }

        if buf[0..4] != BLOCK_MAGIC {
            return Err(StorageError::InvalidBlock(format!(
                "Invalid magic {:?} in {:?}",
                &buf[0..4],
                path
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > BLOCK_VERSION {
            return Err(StorageError::InvalidBlock(format!(
                "Unsupported version {} in {:?}",
                version, path
            )));
        }

        let header = Self {
            version,
            sealed: buf[6] & FLAG_SEALED != 0,
            samples_per_file: read_u64(buf, 8),
            samples_written: read_u64(buf, 16),
            index_rows: read_u32(buf, 24),
            attrs_len: read_u32(buf, 28),
            sample_size: read_u32(buf, 32),
            index_checksum: read_u32(buf, 36),
        };

        if header.samples_written > header.samples_per_file || header.sample_size == 0 {
            return Err(StorageError::InvalidBlock(format!(
                "Inconsistent header in {:?}: {} of {} samples, sample size {}",
                path, header.samples_written, header.samples_per_file, header.sample_size
            )));
        }

        Ok(header)
    }

    fn data_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.attrs_len as u64
    }

    fn index_start(&self) -> u64 {
        self.data_start() + self.samples_per_file * self.sample_size as u64
    }

    fn remaining(&self) -> u64 {
        self.samples_per_file - self.samples_written
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn encode_rows(rows: &[IndexRow]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.len() * ROW_SIZE);
    for row in rows {
        out.extend_from_slice(&row.sample.to_le_bytes());
        out.extend_from_slice(&row.offset.to_le_bytes());
    }
    out
}

/// Write handle for one block file
#[derive(Debug)]
pub struct BlockFileWriter {
    path: PathBuf,
    file: File,
    header: BlockHeader,
    rows: Vec<IndexRow>,
}

impl BlockFileWriter {
    /// Create a new block file. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>, attrs: &BlockAttributes) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if attrs.samples_per_file == 0 {
            return Err(StorageError::InvalidInput(
                "samples_per_file must be positive".into(),
            ));
        }

        let attrs_bytes = bincode::serialize(attrs)?;
        let sample_size = attrs.format.sample_size() as u32;
        let header = BlockHeader::new(attrs.samples_per_file, attrs_bytes.len() as u32, sample_size);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::from_io(&path, e))?;

        file.write_all(&header.to_bytes())?;
        file.write_all(&attrs_bytes)?;
        file.set_len(header.index_start())?;
        file.flush()?;

        Ok(Self {
            path,
            file,
            header,
            rows: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Free capacity in samples
    pub fn remaining(&self) -> u64 {
        self.header.remaining()
    }

    /// Global index one past the last stored sample, if any sample is stored
    pub fn next_sample(&self) -> Option<u64> {
        self.rows
            .last()
            .map(|row| row.sample + (self.header.samples_written - row.offset))
    }

    pub fn samples_written(&self) -> u64 {
        self.header.samples_written
    }

    /// Append packed samples starting at global sample `at_sample`.
    ///
    /// A new index row is written when the file is empty or `at_sample`
    /// skips ahead of the next expected sample.
    pub fn append(&mut self, samples: &[u8], at_sample: u64) -> StorageResult<()> {
        let sample_size = self.header.sample_size as usize;
        if samples.len() % sample_size != 0 {
            return Err(StorageError::InvalidInput(format!(
                "Data length {} is not a multiple of the sample size {}",
                samples.len(),
                sample_size
            )));
        }
        let count = (samples.len() / sample_size) as u64;
        if count == 0 {
            return Ok(());
        }
        if count > self.remaining() {
            return Err(StorageError::InvalidInput(format!(
                "Cannot append {} samples to {:?}: only {} remaining",
                count,
                self.path,
                self.remaining()
            )));
        }

        let new_row = match self.next_sample() {
            Some(next) if at_sample < next => {
                return Err(StorageError::InvalidInput(format!(
                    "Sample {} is before next expected sample {}",
                    at_sample, next
                )));
            }
            Some(next) if at_sample == next => false,
            _ => true,
        };

        let data_pos =
            self.header.data_start() + self.header.samples_written * sample_size as u64;
        self.file.seek(SeekFrom::Start(data_pos))?;
        self.file.write_all(samples)?;

        if new_row {
            let row = IndexRow::new(at_sample, self.header.samples_written);
            let row_pos = self.header.index_start() + (self.rows.len() * ROW_SIZE) as u64;
            self.file.seek(SeekFrom::Start(row_pos))?;
            self.file.write_all(&encode_rows(std::slice::from_ref(&row)))?;
            self.rows.push(row);
            self.header.index_rows = self.rows.len() as u32;
            self.header.index_checksum = crc32fast::hash(&encode_rows(&self.rows));
        }

        self.header.samples_written += count;
        self.write_header()?;

        Ok(())
    }

    /// Seal the file so readers treat it as closed
    pub fn close(mut self) -> StorageResult<()> {
        self.header.sealed = true;
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn write_header(&mut self) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Read-only view of a block file, memory mapped
pub struct BlockFileReader {
    path: PathBuf,
    mmap: Mmap,
    pub header: BlockHeader,
}

impl BlockFileReader {
    /// Open and validate the header of an existing block file
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StorageError::from_io(&path, e))?;
        // SAFETY: writers only append beyond the mapped view or rewrite the
        // header in place; the header is checksummed before it is trusted.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| StorageError::from_io(&path, e))?;
        let header = BlockHeader::from_bytes(&mmap[..], &path)?;

        let required = header.index_start() + (header.index_rows as usize * ROW_SIZE) as u64;
        if (mmap.len() as u64) < required {
            return Err(StorageError::Corruption {
                path,
                reason: format!("Truncated file: {} bytes, need {}", mmap.len(), required),
            });
        }

        Ok(Self { path, mmap, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the attribute section
    pub fn attributes(&self) -> StorageResult<BlockAttributes> {
        let start = HEADER_SIZE;
        let end = start + self.header.attrs_len as usize;
        Ok(bincode::deserialize(&self.mmap[start..end])?)
    }

    /// Decode the sparse sample index
    pub fn sample_index(&self) -> StorageResult<BlockIndex> {
        let start = self.header.index_start() as usize;
        let end = start + self.header.index_rows as usize * ROW_SIZE;
        let region = &self.mmap[start..end];

        let computed = crc32fast::hash(region);
        if computed != self.header.index_checksum {
            return Err(StorageError::Corruption {
                path: self.path.clone(),
                reason: format!(
                    "Index checksum mismatch: stored={}, computed={}",
                    self.header.index_checksum, computed
                ),
            });
        }

        let rows = region
            .chunks_exact(ROW_SIZE)
            .map(|chunk| IndexRow::new(read_u64(chunk, 0), read_u64(chunk, 8)))
            .collect();

        Ok(BlockIndex {
            rows,
            samples_per_file: self.header.samples_per_file,
            samples_written: self.header.samples_written,
            sealed: self.header.sealed,
        })
    }

    /// Copy `len` samples starting at in-file position `offset`
    pub fn read_range(&self, offset: u64, len: u64) -> StorageResult<Vec<u8>> {
        if offset + len > self.header.samples_written {
            return Err(StorageError::InvalidInput(format!(
                "Range {}+{} beyond {} samples written in {:?}",
                offset, len, self.header.samples_written, self.path
            )));
        }
        let size = self.header.sample_size as u64;
        let start = (self.header.data_start() + offset * size) as usize;
        let end = start + (len * size) as usize;
        Ok(self.mmap[start..end].to_vec())
    }
}

/// Read just the header of a block file
pub fn read_header(path: &Path) -> StorageResult<BlockHeader> {
    let mut file = File::open(path).map_err(|e| StorageError::from_io(path, e))?;
    let mut buf = [0u8; HEADER_SIZE];
    std::io::Read::read_exact(&mut file, &mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StorageError::Corruption {
                path: path.to_path_buf(),
                reason: "File too small for header".into(),
            }
        } else {
            StorageError::from_io(path, e)
        }
    })?;
    BlockHeader::from_bytes(&buf, path)
}
