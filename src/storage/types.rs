//! Core data types for the rfstore block store
//!
//! This module defines the fundamental types shared by the writer, the block
//! store and the index:
//! - `ScalarType` and `SampleFormat`: how one sample is laid out on disk
//! - `Sample`: Rust scalar types that can be written to a channel
//! - `BlockAttributes`: scalar attributes stored in every block file
//! - `IndexRow` / `BlockIndex`: the per-file sparse sample index
//! - `SampleBuffer`: the raw result of a vector read

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-width element type of a channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// Get all scalar types for iteration
    pub fn all() -> &'static [ScalarType] {
        &[
            ScalarType::I8,
            ScalarType::U8,
            ScalarType::I16,
            ScalarType::U16,
            ScalarType::I32,
            ScalarType::U32,
            ScalarType::I64,
            ScalarType::U64,
            ScalarType::F32,
            ScalarType::F64,
        ]
    }

    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Decode one little-endian element. `bytes` must hold exactly `size()` bytes.
    pub fn decode_f64(self, bytes: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        match self {
            ScalarType::I8 => i8::from_le_bytes([buf[0]]) as f64,
            ScalarType::U8 => buf[0] as f64,
            ScalarType::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
            ScalarType::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
            ScalarType::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::I64 => i64::from_le_bytes(buf) as f64,
            ScalarType::U64 => u64::from_le_bytes(buf) as f64,
            ScalarType::F64 => f64::from_le_bytes(buf),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::I8 => "i8",
            ScalarType::U8 => "u8",
            ScalarType::I16 => "i16",
            ScalarType::U16 => "u16",
            ScalarType::I32 => "i32",
            ScalarType::U32 => "u32",
            ScalarType::I64 => "i64",
            ScalarType::U64 => "u64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ScalarType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScalarType::all()
            .iter()
            .copied()
            .find(|t| t.to_string() == s.to_ascii_lowercase())
            .ok_or_else(|| StorageError::Config(format!("Unknown scalar type: {}", s)))
    }
}

/// On-disk layout of one sample: scalar type, complex flag, subchannel count
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    pub scalar: ScalarType,
    /// Complex samples are stored as interleaved (real, imag) pairs
    pub is_complex: bool,
    pub num_subchannels: u32,
}

impl SampleFormat {
    pub fn new(scalar: ScalarType, is_complex: bool, num_subchannels: u32) -> StorageResult<Self> {
        if num_subchannels < 1 {
            return Err(StorageError::Config(format!(
                "Number of subchannels must be at least one, not {}",
                num_subchannels
            )));
        }
        Ok(Self {
            scalar,
            is_complex,
            num_subchannels,
        })
    }

    /// Single subchannel of complex values
    pub fn complex(scalar: ScalarType) -> Self {
        Self {
            scalar,
            is_complex: true,
            num_subchannels: 1,
        }
    }

    /// Single subchannel of real values
    pub fn real(scalar: ScalarType) -> Self {
        Self {
            scalar,
            is_complex: false,
            num_subchannels: 1,
        }
    }

    /// Scalar elements per sample across all subchannels
    pub fn values_per_sample(&self) -> usize {
        self.num_subchannels as usize * if self.is_complex { 2 } else { 1 }
    }

    /// Bytes per sample across all subchannels
    pub fn sample_size(&self) -> usize {
        self.values_per_sample() * self.scalar.size()
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} x{}",
            if self.is_complex { "complex " } else { "" },
            self.scalar,
            self.num_subchannels
        )
    }
}

/// Rust scalar types that map onto a `ScalarType`
pub trait Sample: Copy + Send + 'static {
    const SCALAR: ScalarType;

    /// Append the little-endian encoding of this value
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_sample {
    ($($t:ty => $scalar:expr),* $(,)?) => {
        $(
            impl Sample for $t {
                const SCALAR: ScalarType = $scalar;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_sample! {
    i8 => ScalarType::I8,
    u8 => ScalarType::U8,
    i16 => ScalarType::I16,
    u16 => ScalarType::U16,
    i32 => ScalarType::I32,
    u32 => ScalarType::U32,
    i64 => ScalarType::I64,
    u64 => ScalarType::U64,
    f32 => ScalarType::F32,
    f64 => ScalarType::F64,
}

/// Encode a slice of scalars into the on-disk byte layout
pub fn encode_samples<T: Sample>(data: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * T::SCALAR.size());
    for value in data {
        value.write_le(&mut out);
    }
    out
}

/// Scalar attributes stored in every block file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockAttributes {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Capacity of every block file in samples
    pub samples_per_file: u64,
    /// Files per ring-buffer subdirectory before rotation
    pub files_per_subdirectory: u64,
    pub format: SampleFormat,
    /// Ties the data files to external metadata
    pub uuid: String,
    /// Sequence number of this file within the writer session
    pub sequence_num: u64,
    /// Unix time (seconds) when the writer session started
    pub init_utc_timestamp: i64,
}

/// One row of the per-file sparse index: a continuous run starts at global
/// `sample` and is stored from in-file position `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow {
    pub sample: u64,
    pub offset: u64,
}

impl IndexRow {
    pub fn new(sample: u64, offset: u64) -> Self {
        Self { sample, offset }
    }
}

/// A continuous run of samples inside one block file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRun {
    /// Global sample index of the first sample
    pub sample: u64,
    /// In-file position of the first sample
    pub offset: u64,
    /// Number of samples in the run
    pub len: u64,
}

impl SampleRun {
    pub fn end(&self) -> u64 {
        self.sample + self.len
    }
}

/// Per-file sample index as read back from a block file
#[derive(Debug, Clone, PartialEq)]
pub struct BlockIndex {
    pub rows: Vec<IndexRow>,
    pub samples_per_file: u64,
    pub samples_written: u64,
    pub sealed: bool,
}

impl BlockIndex {
    /// Expand the sparse rows into runs with explicit lengths.
    ///
    /// A row's run ends where the next row's in-file offset begins; the last
    /// run ends at `samples_written`.
    pub fn runs(&self) -> StorageResult<Vec<SampleRun>> {
        let mut runs = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            let end_offset = match self.rows.get(i + 1) {
                Some(next) => next.offset,
                None => self.samples_written,
            };
            if end_offset < row.offset {
                return Err(StorageError::InvalidBlock(format!(
                    "Index row {} offset {} beyond following offset {}",
                    i, row.offset, end_offset
                )));
            }
            let len = end_offset - row.offset;
            if let Some(prev) = runs.last() {
                let prev: &SampleRun = prev;
                if row.sample < prev.end() {
                    return Err(StorageError::InvalidBlock(format!(
                        "Index row {} starts at sample {} inside previous run ending at {}",
                        i,
                        row.sample,
                        prev.end()
                    )));
                }
            }
            if len > 0 {
                runs.push(SampleRun {
                    sample: row.sample,
                    offset: row.offset,
                    len,
                });
            }
        }
        Ok(runs)
    }
}

/// Raw samples returned by a vector read
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub format: SampleFormat,
    /// Global sample index of the first sample in `data`
    pub start_sample: u64,
    data: Vec<u8>,
}

impl SampleBuffer {
    pub fn new(format: SampleFormat, start_sample: u64, data: Vec<u8>) -> Self {
        Self {
            format,
            start_sample,
            data,
        }
    }

    pub fn empty(format: SampleFormat, start_sample: u64) -> Self {
        Self::new(format, start_sample, Vec::new())
    }

    /// Number of samples held
    pub fn len(&self) -> u64 {
        (self.data.len() / self.format.sample_size()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last sample held
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Append raw sample bytes that directly follow the current end
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Decode element `value_idx` of sample `sample_idx`
    fn value(&self, sample_idx: usize, value_idx: usize) -> f64 {
        let scalar = self.format.scalar;
        let base = sample_idx * self.format.sample_size() + value_idx * scalar.size();
        scalar.decode_f64(&self.data[base..base + scalar.size()])
    }

    fn check_subchannel(&self, subchannel: u32) -> StorageResult<()> {
        if subchannel >= self.format.num_subchannels {
            return Err(StorageError::InvalidInput(format!(
                "Data has only {} subchannels, does not have subchannel {}",
                self.format.num_subchannels, subchannel
            )));
        }
        Ok(())
    }

    /// Values of one subchannel of a real-valued channel, widened to f64
    pub fn subchannel_values(&self, subchannel: u32) -> StorageResult<Vec<f64>> {
        self.check_subchannel(subchannel)?;
        if self.format.is_complex {
            return Err(StorageError::InvalidInput(
                "Complex channels must be read as (real, imag) pairs".into(),
            ));
        }
        Ok((0..self.len() as usize)
            .map(|i| self.value(i, subchannel as usize))
            .collect())
    }

    /// (real, imag) pairs of one subchannel of a complex channel
    pub fn complex_values(&self, subchannel: u32) -> StorageResult<Vec<(f64, f64)>> {
        self.check_subchannel(subchannel)?;
        if !self.format.is_complex {
            return Err(StorageError::InvalidInput(
                "Single valued channels cannot be cast to complex".into(),
            ));
        }
        let base = subchannel as usize * 2;
        Ok((0..self.len() as usize)
            .map(|i| (self.value(i, base), self.value(i, base + 1)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_sizes() {
        let format = SampleFormat::new(ScalarType::I16, true, 3).unwrap();
        assert_eq!(format.values_per_sample(), 6);
        assert_eq!(format.sample_size(), 12);

        let format = SampleFormat::real(ScalarType::F64);
        assert_eq!(format.sample_size(), 8);

        assert!(SampleFormat::new(ScalarType::U8, false, 0).is_err());
    }

    #[test]
    fn test_scalar_type_parse() {
        for scalar in ScalarType::all() {
            let parsed: ScalarType = scalar.to_string().parse().unwrap();
            assert_eq!(parsed, *scalar);
        }
        assert!("c64".parse::<ScalarType>().is_err());
    }

    #[test]
    fn test_block_index_runs_with_internal_gap() {
        // 30 samples at 1000, then a gap, then 10 samples at 1100
        let index = BlockIndex {
            rows: vec![IndexRow::new(1000, 0), IndexRow::new(1100, 30)],
            samples_per_file: 40,
            samples_written: 40,
            sealed: true,
        };
        let runs = index.runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], SampleRun { sample: 1000, offset: 0, len: 30 });
        assert_eq!(runs[1], SampleRun { sample: 1100, offset: 30, len: 10 });
    }

    #[test]
    fn test_block_index_partial_file() {
        let index = BlockIndex {
            rows: vec![IndexRow::new(500, 0)],
            samples_per_file: 40,
            samples_written: 12,
            sealed: true,
        };
        let runs = index.runs().unwrap();
        assert_eq!(runs, vec![SampleRun { sample: 500, offset: 0, len: 12 }]);
    }

    #[test]
    fn test_block_index_rejects_overlapping_rows() {
        let index = BlockIndex {
            rows: vec![IndexRow::new(1000, 0), IndexRow::new(1010, 20)],
            samples_per_file: 40,
            samples_written: 40,
            sealed: true,
        };
        assert!(index.runs().is_err());
    }

    #[test]
    fn test_sample_buffer_views() {
        let format = SampleFormat::new(ScalarType::I16, true, 2).unwrap();
        // two samples, two complex subchannels each
        let data = encode_samples(&[1i16, 2, 3, 4, 5, 6, 7, 8]);
        let buffer = SampleBuffer::new(format, 100, data);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.end_sample(), 102);

        assert_eq!(buffer.complex_values(0).unwrap(), vec![(1.0, 2.0), (5.0, 6.0)]);
        assert_eq!(buffer.complex_values(1).unwrap(), vec![(3.0, 4.0), (7.0, 8.0)]);
        assert!(buffer.complex_values(2).is_err());
        assert!(buffer.subchannel_values(0).is_err());
    }

    #[test]
    fn test_real_buffer_rejects_complex_view() {
        let format = SampleFormat::real(ScalarType::F32);
        let buffer = SampleBuffer::new(format, 0, encode_samples(&[1.5f32, -2.0]));
        assert_eq!(buffer.subchannel_values(0).unwrap(), vec![1.5, -2.0]);
        assert!(matches!(
            buffer.complex_values(0),
            Err(StorageError::InvalidInput(_))
        ));
    }
}
