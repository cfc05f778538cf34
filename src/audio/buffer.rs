//! Audio frame and playback buffer types

use std::sync::Arc;

use crate::codec::resample_all;
use crate::error::CodecError;

/// Fixed-length block of mono PCM16 samples produced by the capture path.
///
/// Frames are encoded and sent as soon as they are complete; nothing keeps
/// them around afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    /// Frame sequence number within the capture run
    pub sequence: u32,
    /// Capture time in microseconds since the capture started
    pub timestamp_us: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u32) -> Self {
        Self {
            samples,
            sequence,
            timestamp_us: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate.max(1) as u64
    }
}

/// Decoded audio ready to be scheduled, interleaved f32 in [-1, 1)
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Interleaved samples
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mono value of one frame (channels averaged)
    pub fn mono_at(&self, frame: usize) -> f32 {
        let channels = self.channels as usize;
        let start = frame * channels;
        match self.samples.get(start..start + channels) {
            Some(values) => values.iter().sum::<f32>() / channels as f32,
            None => 0.0,
        }
    }

    /// Mono copy at `sample_rate`, band-limited when the rate changes
    pub fn resampled(&self, sample_rate: u32) -> Result<PlaybackBuffer, CodecError> {
        let mono: Vec<f32> = (0..self.frames()).map(|i| self.mono_at(i)).collect();
        let samples = resample_all(&mono, self.sample_rate, sample_rate)?;
        Ok(PlaybackBuffer::new(samples, sample_rate, 1))
    }

    pub fn into_shared(self) -> SharedPlaybackBuffer {
        Arc::new(self)
    }
}

/// Buffers are shared between the scheduler and the output thread
pub type SharedPlaybackBuffer = Arc<PlaybackBuffer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 4096], 3).with_timestamp(10);
        assert_eq!(frame.duration_us(16_000), 256_000);
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.timestamp_us, 10);
        assert_eq!(frame.len(), 4096);
    }

    #[test]
    fn test_playback_buffer_duration() {
        let buffer = PlaybackBuffer::new(vec![0.0; 2400], 24_000, 1);
        assert_eq!(buffer.frames(), 2400);
        assert!((buffer.duration() - 0.1).abs() < 1e-12);

        let stereo = PlaybackBuffer::new(vec![0.0; 2400], 24_000, 2);
        assert_eq!(stereo.frames(), 1200);
    }

    #[test]
    fn test_mono_at() {
        let stereo = PlaybackBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 24_000, 2);
        assert_eq!(stereo.mono_at(0), 0.5);
        assert_eq!(stereo.mono_at(1), 0.5);
        assert_eq!(stereo.mono_at(2), 0.0);
    }

    #[test]
    fn test_resampled_keeps_duration() {
        let buffer = PlaybackBuffer::new(vec![0.1; 4800], 24_000, 2);
        let converted = buffer.resampled(48_000).unwrap();
        assert_eq!(converted.sample_rate(), 48_000);
        assert_eq!(converted.channels(), 1);
        assert_eq!(converted.frames(), 4800);
        assert!((converted.duration() - buffer.duration()).abs() < 1e-9);
    }
}
