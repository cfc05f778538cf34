//! Audio subsystem module
//!
//! The session talks to audio hardware only through the traits below. The
//! `cpal` implementations live in [`device`], [`capture`] and [`output`].

use tokio::sync::mpsc;

use crate::error::AudioError;

pub mod buffer;
pub mod capture;
pub mod device;
pub mod mixer;
pub mod output;
pub mod playback;

pub use buffer::{AudioFrame, PlaybackBuffer, SharedPlaybackBuffer};
pub use capture::{CapturePipeline, FrameChunker, FrameSink};
pub use device::{list_devices, AudioDeviceInfo, CpalInput};
pub use mixer::Mixer;
pub use output::{CpalOutput, DeviceRenderer};
pub use playback::{PlaybackScheduler, ScheduledSource, SourceId};

/// Receives interleaved f32 samples from an input device callback
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Native format of an acquired input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Source of microphone handles
pub trait InputBackend: Send + Sync {
    /// Acquire the input device. May block while the platform asks the user
    /// for permission.
    fn acquire(&self) -> Result<Box<dyn Microphone>, AudioError>;
}

/// An acquired microphone. Dropping it releases the device.
pub trait Microphone: Send {
    fn name(&self) -> &str;

    fn format(&self) -> InputFormat;

    /// Start delivering samples to `callback`
    fn open_stream(&mut self, callback: InputCallback) -> Result<Box<dyn InputStream>, AudioError>;

    /// Release the device handle. Idempotent.
    fn release(&mut self) -> Result<(), AudioError>;

    fn is_acquired(&self) -> bool;
}

/// A running input stream
pub trait InputStream: Send {
    /// Disconnect from the device. Idempotent.
    fn stop(&mut self) -> Result<(), AudioError>;

    fn is_running(&self) -> bool;
}

/// Source of output streams
pub trait OutputBackend: Send + Sync {
    /// Open an output with its own playback clock. The ids of sources that
    /// finish playing are sent on `completions`.
    fn open(
        &self,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputStream>, AudioError>;
}

/// An open output: a playback clock plus a set of scheduled sources
pub trait OutputStream: Send {
    /// Current playback clock in seconds
    fn now(&self) -> f64;

    /// Play `buffer` starting at clock time `at`
    fn start_source(&mut self, id: SourceId, at: f64, buffer: SharedPlaybackBuffer);

    /// Stop a scheduled or playing source. Returns false if it was unknown.
    fn stop_source(&mut self, id: SourceId) -> bool;

    /// Close the output. Idempotent.
    fn close(&mut self) -> Result<(), AudioError>;

    fn is_open(&self) -> bool;
}
