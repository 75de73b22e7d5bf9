//! Minimal RIFF/WAVE container for mono 16-bit PCM.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "RIFF" | total_len - 8 : u32 | "WAVE"
//! "fmt " | 16 : u32 | format = 1 : u16 | channels = 1 : u16
//!        | sample_rate : u32 | byte_rate : u32 | block_align : u16 | bits = 16 : u16
//! "data" | data_len : u32 | samples : [i16]
//! ```

use crate::{MetronomeError, Result};

pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;
/// `WAVE_FORMAT_PCM`.
pub const FORMAT_PCM: u16 = 1;
/// Size of everything before the first sample.
pub const HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;
const BYTES_PER_SAMPLE: u16 = BITS_PER_SAMPLE / 8;

/// Bytes per second of audio declared in the `fmt ` chunk, or `None` when it
/// does not fit the field.
pub fn byte_rate(sample_rate: u32) -> Option<u32> {
    sample_rate
        .checked_mul(u32::from(CHANNELS))?
        .checked_mul(u32::from(BYTES_PER_SAMPLE))
}

/// Bytes per sample frame declared in the `fmt ` chunk.
pub fn block_align() -> u16 {
    CHANNELS * BYTES_PER_SAMPLE
}

/// Packages `samples` into a complete WAVE file image.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let byte_rate = byte_rate(sample_rate).ok_or_else(|| {
        MetronomeError::invalid(format!("sample rate {sample_rate} is too high for WAVE"))
    })?;
    let data_len = samples
        .len()
        .checked_mul(usize::from(BYTES_PER_SAMPLE))
        .and_then(|len| u32::try_from(len).ok())
        .filter(|len| len.checked_add(HEADER_LEN as u32 - 8).is_some())
        .ok_or_else(|| {
            MetronomeError::invalid(format!(
                "{} samples do not fit in a WAVE data chunk",
                samples.len()
            ))
        })?;

    let mut out = Vec::with_capacity(HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(HEADER_LEN as u32 - 8 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align().to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn header_fields_are_bit_exact() {
        let bytes = encode_wav(&[0, 1, -1], 44_100).unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), bytes.len() as u32 - 8);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16);
        assert_eq!(u16_at(&bytes, 20), 1);
        assert_eq!(u16_at(&bytes, 22), 1);
        assert_eq!(u32_at(&bytes, 24), 44_100);
        assert_eq!(u32_at(&bytes, 28), 88_200);
        assert_eq!(u16_at(&bytes, 32), 2);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 6);
        assert_eq!(&bytes[44..], &[0x00, 0x00, 0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn data_chunk_carries_samples_unchanged() {
        let samples: Vec<i16> = vec![i16::MIN, -12_345, -1, 0, 1, 12_345, i16::MAX];
        let bytes = encode_wav(&samples, 22_050).unwrap();

        let decoded: Vec<i16> = bytes[HEADER_LEN..]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn generic_decoder_accepts_output() {
        let samples: Vec<i16> = (0..500).map(|i| (i * 61 - 15_000) as i16).collect();
        let bytes = encode_wav(&samples, 48_000).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn rejects_sample_rate_whose_byte_rate_overflows() {
        assert!(encode_wav(&[0; 4], 3_000_000_000).is_err());
        assert!(encode_wav(&[0; 4], u32::MAX / 2 + 1).is_err());
        assert_eq!(byte_rate(u32::MAX / 2), Some(u32::MAX - 1));
    }

    #[test]
    fn declared_rates_follow_format_arithmetic() {
        for rate in [8_000, 44_100, 96_000] {
            let bytes = encode_wav(&[], rate).unwrap();
            let channels = u32::from(u16_at(&bytes, 22));
            let bits = u32::from(u16_at(&bytes, 34));
            assert_eq!(u32_at(&bytes, 28), rate * channels * bits / 8);
            assert_eq!(u32::from(u16_at(&bytes, 32)), channels * bits / 8);
            assert_eq!(u32_at(&bytes, 40), 0);
        }
    }
}
