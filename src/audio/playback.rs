//! Gapless playback scheduling
//!
//! Each decoded chunk starts where the previous one ends:
//! `start = max(next_start_time, now)`, then `next_start_time += duration`.
//! When chunks arrive late playback resumes immediately but the schedule
//! is never pulled back to wall-clock time.

use std::collections::BTreeMap;

use crate::audio::buffer::PlaybackBuffer;
use crate::audio::OutputStream;
use crate::codec::EncodedAudioChunk;
use crate::error::{AudioError, CodecError};

/// Identifier of a scheduled source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Where a source sits on the playback clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Start on the output clock, in seconds
    pub start: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules decoded audio on one output stream
pub struct PlaybackScheduler {
    /// Output context whose clock sources are placed on
    output: Box<dyn OutputStream>,
    /// Rate assumed for chunks whose mime tag has none
    default_rate: u32,
    /// Where the next chunk starts, in output clock seconds; 0 after an
    /// interruption
    next_start_time: f64,
    /// Sources scheduled or playing, until they end or are stopped
    active: BTreeMap<SourceId, ScheduledSource>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputStream>, default_rate: u32) -> Self {
        Self {
            output,
            default_rate,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Decode and schedule an inbound chunk. Empty chunks are ignored.
    pub fn schedule(
        &mut self,
        chunk: &EncodedAudioChunk,
    ) -> Result<Option<ScheduledSource>, CodecError> {
        let buffer = chunk.decode(self.default_rate)?;
        Ok(self.schedule_buffer(buffer))
    }

    /// Schedule an already decoded buffer right after the previous one
    pub fn schedule_buffer(&mut self, buffer: PlaybackBuffer) -> Option<ScheduledSource> {
        if buffer.frames() == 0 {
            return None;
        }

        let start = self.next_start_time.max(self.output.now());
        let duration = buffer.duration();
        let id = SourceId(self.next_id);
        self.next_id += 1;

        self.output.start_source(id, start, buffer.into_shared());
        self.next_start_time = start + duration;

        let source = ScheduledSource {
            id,
            start,
            duration,
        };
        self.active.insert(id, source);
        tracing::debug!(
            "Scheduled {} at {:.3}s for {:.3}s ({} active)",
            id,
            start,
            duration,
            self.active.len()
        );
        Some(source)
    }

    /// Stop everything scheduled or playing and restart the clock on the
    /// next chunk. Returns how many sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop_source(id);
        }
        self.next_start_time = 0.0;
        if stopped > 0 {
            tracing::debug!("Interrupted playback, stopped {} source(s)", stopped);
        }
        stopped
    }

    /// A source finished on its own
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Close the output, then stop and forget all sources. Safe to call
    /// repeatedly; the sources are cleared even if closing fails.
    pub fn close(&mut self) -> Result<(), AudioError> {
        let result = if self.output.is_open() {
            self.output.close()
        } else {
            Ok(())
        };
        self.interrupt();
        result
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn now(&self) -> f64 {
        self.output.now()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.active.values()
    }

    pub fn is_open(&self) -> bool {
        self.output.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OutputBackend;
    use crate::codec::float_frame_to_wire;
    use crate::constants::PLAYBACK_MIME_TYPE;
    use crate::testing::FakeOutput;
    use tokio::sync::mpsc;

    fn scheduler() -> (PlaybackScheduler, FakeOutput) {
        let output = FakeOutput::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let stream = output.open(24_000, tx).unwrap();
        (PlaybackScheduler::new(stream, 24_000), output)
    }

    /// 100 ms of audio at 24 kHz
    fn chunk() -> EncodedAudioChunk {
        EncodedAudioChunk::new(float_frame_to_wire(&[0.1; 2400]), PLAYBACK_MIME_TYPE)
    }

    #[test]
    fn test_gapless_schedule() {
        let (mut scheduler, output) = scheduler();
        output.set_now(0.5);

        let starts: Vec<f64> = (0..5)
            .map(|_| scheduler.schedule(&chunk()).unwrap().unwrap().start)
            .collect();

        for (k, start) in starts.iter().enumerate() {
            assert!((start - (starts[0] + k as f64 * 0.1)).abs() < 1e-9);
        }
        assert!((starts[0] - 0.5).abs() < 1e-12);
        assert_eq!(scheduler.active_count(), 5);
        assert_eq!(output.playing(), 5);
    }

    #[test]
    fn test_late_chunk_starts_now_without_resync() {
        let (mut scheduler, output) = scheduler();
        let first = scheduler.schedule(&chunk()).unwrap().unwrap();
        assert_eq!(first.start, 0.0);

        // Caller fell behind: the clock is past the scheduled end
        output.set_now(1.0);
        let second = scheduler.schedule(&chunk()).unwrap().unwrap();
        assert_eq!(second.start, 1.0);
        assert!((scheduler.next_start_time() - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_next_start_never_behind_clock() {
        let (mut scheduler, output) = scheduler();
        for i in 0..20 {
            output.set_now(i as f64 * 0.07);
            let source = scheduler.schedule(&chunk()).unwrap().unwrap();
            assert!(source.start >= output.now());
            assert!(scheduler.next_start_time() >= source.start);
        }
    }

    #[test]
    fn test_interrupt_resets_clock() {
        let (mut scheduler, output) = scheduler();
        for _ in 0..3 {
            scheduler.schedule(&chunk()).unwrap();
        }
        assert!((scheduler.next_start_time() - 0.3).abs() < 1e-9);

        output.set_now(0.05);
        assert_eq!(scheduler.interrupt(), 3);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(output.playing(), 0);

        let next = scheduler.schedule(&chunk()).unwrap().unwrap();
        assert_eq!(next.start, 0.05);
    }

    #[test]
    fn test_completed_sources_are_released() {
        let (mut scheduler, _output) = scheduler();
        let a = scheduler.schedule(&chunk()).unwrap().unwrap();
        let b = scheduler.schedule(&chunk()).unwrap().unwrap();

        assert!(scheduler.on_source_ended(a.id));
        assert!(!scheduler.on_source_ended(a.id));
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.active_sources().next().map(|s| s.id), Some(b.id));
    }

    #[test]
    fn test_malformed_and_empty_chunks() {
        let (mut scheduler, _output) = scheduler();
        let odd = EncodedAudioChunk::new(bytes::Bytes::from_static(&[1, 2, 3]), PLAYBACK_MIME_TYPE);
        assert!(scheduler.schedule(&odd).is_err());

        let empty = EncodedAudioChunk::new(bytes::Bytes::new(), PLAYBACK_MIME_TYPE);
        assert_eq!(scheduler.schedule(&empty).unwrap(), None);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut scheduler, output) = scheduler();
        scheduler.schedule(&chunk()).unwrap();
        scheduler.close().unwrap();
        scheduler.close().unwrap();
        assert!(!scheduler.is_open());
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(output.open_streams(), 0);
    }
}
