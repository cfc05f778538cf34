//! Error types for live voice sessions

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl AudioError {
    /// Whether the failure means the user has to grant access and retry
    pub fn is_permission(&self) -> bool {
        matches!(self, AudioError::PermissionDenied(_))
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceNotFound("device no longer available".to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                AudioError::UnsupportedFormat("stream config not supported".to_string())
            }
            other => AudioError::StreamError(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

/// PCM / wire codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Chunk length {len} is not a multiple of {channels} channel(s) x 2 bytes")]
    InvalidLength { len: usize, channels: u16 },

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Resampler error: {0}")]
    Resampler(String),
}

/// Duplex connection errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Setup handshake failed: {0}")]
    Handshake(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session must be stopped first (state: {0})")]
    NotIdle(SessionState),

    #[error("{0}")]
    Audio(#[from] AudioError),

    #[error("{0}")]
    Connection(#[from] ConnectionError),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
