//! Application configuration
//!
//! Built once at startup (defaults, then the TOML file, then the environment),
//! validated, and handed to collaborators behind an `Arc`. Nothing reads it
//! from global state.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Environment variables checked for the API credential, in order
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Environment variable overriding the model name
pub const MODEL_ENV_VAR: &str = "LIVE_VOICE_MODEL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Hosted model endpoint settings
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Usually taken from the environment rather than the file
    pub api_key: String,
    pub model: String,
    /// Websocket URL of the live endpoint
    pub endpoint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Audio device and format settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of the audio sent to the model
    pub capture_sample_rate: u32,
    /// Timeline rate of the audio received from the model
    pub playback_sample_rate: u32,
    /// Samples per outbound frame
    pub frame_samples: usize,
    /// Input device name; `None` selects the system default
    pub input_device: Option<String>,
    /// Output device name; `None` selects the system default
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_samples: FRAME_SAMPLES,
            input_device: None,
            output_device: None,
        }
    }
}

/// Live session behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub voice: String,
    pub system_instruction: Option<String>,
    /// Frames that may wait for the socket before new ones are dropped
    pub outbound_queue_frames: usize,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
    /// Seconds to wait for the server to acknowledge setup
    pub setup_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: None,
            outbound_queue_frames: DEFAULT_OUTBOUND_QUEUE_FRAMES,
            transcribe_input: true,
            transcribe_output: true,
            setup_timeout_secs: DEFAULT_SETUP_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "live-voice").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full startup load: file (explicit or default path), then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_file(p)?,
            None => match Self::default_path() {
                Some(p) => Self::load_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|v| !v.trim().is_empty())
        {
            self.api.api_key = key.trim().to_string();
        }
        if let Some(model) = lookup(MODEL_ENV_VAR).filter(|v| !v.trim().is_empty()) {
            self.api.model = model.trim().to_string();
        }
    }

    /// Reject settings the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "no API key configured (set {} or api.api_key)",
                API_KEY_ENV_VARS[0]
            )));
        }
        if self.api.model.trim().is_empty() {
            return Err(Error::Config("api.model is empty".to_string()));
        }
        if !self.api.endpoint.starts_with("ws://") && !self.api.endpoint.starts_with("wss://") {
            return Err(Error::Config(format!(
                "api.endpoint must be a ws:// or wss:// URL, got {}",
                self.api.endpoint
            )));
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.audio.frame_samples == 0 {
            return Err(Error::Config("audio.frame_samples must be non-zero".to_string()));
        }
        if self.session.outbound_queue_frames == 0 {
            return Err(Error::Config(
                "session.outbound_queue_frames must be non-zero".to_string(),
            ));
        }
        if self.session.setup_timeout_secs == 0 {
            return Err(Error::Config(
                "session.setup_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Mime tag for outbound audio at the configured capture rate
    pub fn capture_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.audio.capture_sample_rate)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}
