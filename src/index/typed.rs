//! Typed views over raw vector reads

use crate::index::error::{IndexError, IndexResult};
use crate::storage::{SampleBuffer, StorageError};
use serde::Serialize;

/// Canonical single-precision complex sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

/// Convert one subchannel of a complex buffer, whatever its scalar type
pub fn to_complex32(buffer: &SampleBuffer, subchannel: u32) -> IndexResult<Vec<Complex32>> {
    let pairs = buffer.complex_values(subchannel).map_err(|err| match err {
        StorageError::InvalidInput(msg) => IndexError::InvalidInput(msg),
        other => IndexError::Storage(other),
    })?;
    Ok(pairs
        .into_iter()
        .map(|(re, im)| Complex32::new(re as f32, im as f32))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{encode_samples, SampleFormat, ScalarType};

    #[test]
    fn test_complex_i16_to_complex32() {
        let format = SampleFormat::new(ScalarType::I16, true, 2).unwrap();
        // two samples, two subchannels, (re, im) each
        let data = encode_samples(&[1i16, -1, 10, -10, 2, -2, 20, -20]);
        let buffer = SampleBuffer::new(format, 0, data);

        assert_eq!(
            to_complex32(&buffer, 1).unwrap(),
            vec![Complex32::new(10.0, -10.0), Complex32::new(20.0, -20.0)]
        );
    }

    #[test]
    fn test_complex_f64_narrows() {
        let format = SampleFormat::complex(ScalarType::F64);
        let buffer = SampleBuffer::new(format, 0, encode_samples(&[0.5f64, 0.25]));
        assert_eq!(to_complex32(&buffer, 0).unwrap(), vec![Complex32::new(0.5, 0.25)]);
    }

    #[test]
    fn test_real_channel_rejected() {
        let format = SampleFormat::real(ScalarType::F32);
        let buffer = SampleBuffer::new(format, 0, encode_samples(&[1.0f32, 2.0]));
        assert!(matches!(to_complex32(&buffer, 0), Err(IndexError::InvalidInput(_))));

        let format = SampleFormat::complex(ScalarType::F32);
        let buffer = SampleBuffer::new(format, 0, encode_samples(&[1.0f32, 2.0]));
        assert!(matches!(to_complex32(&buffer, 1), Err(IndexError::InvalidInput(_))));
    }
}
