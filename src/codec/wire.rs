//! Base64 wire form of audio chunks

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;

use crate::audio::buffer::{AudioFrame, PlaybackBuffer};
use crate::codec::pcm::{decode_wire_chunk, encode_samples};
use crate::error::CodecError;

/// A unit of audio exchanged over the duplex connection: raw PCM16 bytes
/// plus the mime tag describing their format.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudioChunk {
    /// Little-endian PCM16, interleaved when multichannel
    pub data: Bytes,
    /// Carries the sample rate as `rate=`
    pub mime_type: String,
}

impl EncodedAudioChunk {
    pub fn new(data: Bytes, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Encode a captured frame for sending
    pub fn from_frame(frame: &AudioFrame, mime_type: impl Into<String>) -> Self {
        Self::new(encode_samples(frame.samples()), mime_type)
    }

    /// Parse the base64 payload of an inbound chunk
    pub fn from_base64(data: &str, mime_type: impl Into<String>) -> Result<Self, CodecError> {
        let bytes = general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
        Ok(Self::new(Bytes::from(bytes), mime_type))
    }

    /// Base64 text for the wire
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.data)
    }

    /// Sample rate from a `rate=` parameter in the mime tag
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }

    /// Whether the tag describes raw PCM
    pub fn is_pcm(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .map(|base| base.trim().eq_ignore_ascii_case("audio/pcm"))
            .unwrap_or(false)
    }

    /// Decode into a mono playback buffer, falling back to `default_rate`
    /// when the tag carries no rate
    pub fn decode(&self, default_rate: u32) -> Result<PlaybackBuffer, CodecError> {
        decode_wire_chunk(&self.data, self.sample_rate().unwrap_or(default_rate), 1)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
