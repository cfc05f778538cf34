//! Sample-accurate mixer behind the output stream
//!
//! The mixer owns the playback clock: it advances only as frames are
//! rendered, so `now()` is the time of the next frame it will produce.
//! Sources are placed on that timeline by start time and summed into a
//! mono signal at the timeline rate; conversion to the device rate happens
//! downstream.

use crate::audio::buffer::SharedPlaybackBuffer;
use crate::audio::playback::SourceId;

struct MixerSource {
    id: SourceId,
    /// First timeline frame of the source
    start_frame: u64,
    /// Length in timeline frames
    length: u64,
    buffer: SharedPlaybackBuffer,
}

pub struct Mixer {
    /// Timeline rate; buffers are expected at this rate
    sample_rate: u32,
    /// Frames rendered so far, which is the playback clock
    frames_rendered: u64,
    /// Sources still on the timeline, in the order they were added
    sources: Vec<MixerSource>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            sources: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback clock in seconds
    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Place a buffer on the timeline at `at` seconds. A start time the
    /// clock has already passed plays from the beginning of the buffer at
    /// the next rendered frame.
    pub fn add(&mut self, id: SourceId, at: f64, buffer: SharedPlaybackBuffer) {
        let start_frame = ((at.max(0.0) * self.sample_rate as f64).round() as u64)
            .max(self.frames_rendered);
        let length = buffer.frames() as u64;
        self.sources.push(MixerSource {
            id,
            start_frame,
            length,
            buffer,
        });
    }

    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    /// Drop every source, returning their ids
    pub fn clear(&mut self) -> Vec<SourceId> {
        self.sources.drain(..).map(|s| s.id).collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Render `out.len()` mono frames, advancing the clock. Sources that
    /// ended within this block are removed and pushed onto `finished`.
    pub fn render(&mut self, out: &mut [f32], finished: &mut Vec<SourceId>) {
        for (i, sample) in out.iter_mut().enumerate() {
            let pos = self.frames_rendered + i as u64;
            let mut value = 0.0f32;
            for source in &self.sources {
                if pos < source.start_frame || pos >= source.start_frame + source.length {
                    continue;
                }
                value += source.buffer.mono_at((pos - source.start_frame) as usize);
            }
            *sample = value.clamp(-1.0, 1.0);
        }

        self.frames_rendered += out.len() as u64;
        let now = self.frames_rendered;
        self.sources.retain(|s| {
            if s.start_frame + s.length <= now {
                finished.push(s.id);
                false
            } else {
                true
            }
        });
    }
}
