//! 16-bit PCM conversion
//!
//! All wire audio is signed 16-bit little-endian PCM. Float samples are
//! scaled by 32768 on the way out and divided by 32768 on the way in.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::buffer::PlaybackBuffer;
use crate::error::CodecError;

/// Scale between float samples and 16-bit integers
pub const PCM16_SCALE: f32 = 32768.0;

/// Serialize samples as little-endian PCM16
pub fn encode_samples(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        out.put_i16_le(s);
    }
    out.freeze()
}

/// Convert float samples to PCM16.
///
/// Input is clamped to [-1, 1] first; +1.0 saturates to `i16::MAX`.
/// Scaling truncates toward zero.
pub fn float_to_pcm16(frame: &[f32]) -> Vec<i16> {
    frame
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            // `as` saturates, so 32768.0 lands on 32767
            (s * PCM16_SCALE) as i16
        })
        .collect()
}

/// Convert a float frame straight to wire bytes
pub fn float_frame_to_wire(frame: &[f32]) -> Bytes {
    encode_samples(&float_to_pcm16(frame))
}

/// Rebuild a playable buffer from wire bytes
pub fn decode_wire_chunk(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackBuffer, CodecError> {
    if channels == 0 {
        return Err(CodecError::UnsupportedChannels(channels));
    }
    let frame_bytes = channels as usize * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::InvalidLength {
            len: bytes.len(),
            channels,
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect();

    Ok(PlaybackBuffer::new(samples, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = encode_samples(&[1, -1, 0x1234]);
        assert_eq!(&bytes[..], &[0x01, 0x00, 0xff, 0xff, 0x34, 0x12]);
    }

    #[test]
    fn test_float_scaling_truncates() {
        let pcm = float_to_pcm16(&[0.0, 0.5, -0.5, 1.0, -1.0, 0.00002]);
        assert_eq!(pcm, vec![0, 16384, -16384, i16::MAX, i16::MIN, 0]);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let pcm = float_to_pcm16(&[1.5, -3.0, f32::INFINITY, f32::NAN]);
        assert_eq!(pcm, vec![i16::MAX, i16::MIN, i16::MAX, 0]);
    }

    #[test]
    fn test_decode_divides_by_32768() {
        let buffer = decode_wire_chunk(&encode_samples(&[16384, -32768]), 24_000, 1).unwrap();
        assert_eq!(buffer.samples(), &[0.5, -1.0]);
        assert_eq!(buffer.sample_rate(), 24_000);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    fn test_decode_rejects_partial_frames() {
        assert_eq!(
            decode_wire_chunk(&[0, 0, 0], 24_000, 1),
            Err(CodecError::InvalidLength { len: 3, channels: 1 })
        );
        // Six bytes is three mono samples but not whole stereo frames
        assert_eq!(
            decode_wire_chunk(&[0; 6], 24_000, 2),
            Err(CodecError::InvalidLength { len: 6, channels: 2 })
        );
        assert_eq!(
            decode_wire_chunk(&[0; 4], 24_000, 0),
            Err(CodecError::UnsupportedChannels(0))
        );
    }

    #[test]
    fn test_decode_empty_chunk() {
        let buffer = decode_wire_chunk(&[], 24_000, 1).unwrap();
        assert_eq!(buffer.frames(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }

    proptest! {
        #[test]
        fn roundtrip_within_one_step(samples in proptest::collection::vec(-1.0f32..=1.0, 0..512)) {
            let wire = float_frame_to_wire(&samples);
            let decoded = decode_wire_chunk(&wire, 16_000, 1).unwrap();
            prop_assert_eq!(decoded.samples().len(), samples.len());
            for (orig, back) in samples.iter().zip(decoded.samples()) {
                prop_assert!((orig - back).abs() <= 1.0 / PCM16_SCALE + f32::EPSILON);
            }
        }
    }
}
