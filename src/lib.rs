//! # Live Voice
//!
//! Real-time duplex voice sessions against a hosted generative audio model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                LOCAL HOST                                    │
//! │  ┌─────────────┐                                        ┌─────────────┐     │
//! │  │ Microphone  │                                        │  Speakers   │     │
//! │  └──────┬──────┘                                        └──────▲──────┘     │
//! │         │ native rate, N channels                              │ native rate │
//! │         ▼                                                      │            │
//! │  ┌─────────────────────┐                          ┌────────────┴────────┐   │
//! │  │ Capture (cpal thr.) │                          │ Output mixer (cpal) │   │
//! │  │ downmix + resample  │                          │ playback clock      │   │
//! │  │ 4096-sample frames  │                          └────────────▲────────┘   │
//! │  └──────────┬──────────┘                                       │            │
//! │             │ PCM16 → base64                       start/stop sources       │
//! │             ▼                                                  │            │
//! │  ┌─────────────────────┐   ┌──────────────────┐   ┌────────────┴────────┐   │
//! │  │ bounded outbound    │   │  LiveSession     │──▶│ PlaybackScheduler   │   │
//! │  │ queue (drop newest) │   │  state machine   │   │ nextStartTime       │   │
//! │  └──────────┬──────────┘   │  transcript log  │   └─────────────────────┘   │
//! │             │              └────────▲─────────┘                             │
//! │             ▼                       │ inbound events                        │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │              Connection task (connection::gemini)                    │   │
//! │  │      websocket writer  ◀──── outbound ───   reader ───▶ events       │   │
//! │  └─────────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────┼───────────────────────────────────────┘
//!                                       │ wss
//!                                       ▼
//!                         hosted bidirectional model endpoint
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of audio sent to the model
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of audio streamed back by the model
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Samples per captured frame (mono)
    pub const FRAME_SAMPLES: usize = 4096;

    /// Mime tag attached to every outbound audio chunk
    pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

    /// Mime tag the model uses for inline audio
    pub const PLAYBACK_MIME_TYPE: &str = "audio/pcm;rate=24000";

    /// Default live model
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

    /// Default bidirectional streaming endpoint
    pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

    /// Default prebuilt voice
    pub const DEFAULT_VOICE: &str = "Zephyr";

    /// Outbound frame queue depth (~8 s of audio at the capture rate)
    pub const DEFAULT_OUTBOUND_QUEUE_FRAMES: usize = 32;

    /// Seconds to wait for the server to acknowledge setup
    pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 15;

    /// Capacity of the cpal error channel
    pub const STREAM_ERROR_CHANNEL_CAPACITY: usize = 16;
}
