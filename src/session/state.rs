//! Session state, status and counters

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }

    /// Whether the session holds, or is acquiring, resources
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus the human-readable status line shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Text shown to the user; empty when idle
    pub message: String,
}

impl SessionStatus {
    pub fn new(state: SessionState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new(SessionState::Idle, "")
    }
}

/// Snapshot of per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames accepted by the outbound queue
    pub frames_sent: u64,
    /// Frames dropped because the outbound queue was full
    pub frames_dropped: u64,
    /// Inbound audio chunks placed on the playback clock
    pub chunks_scheduled: u64,
    /// Inbound chunks skipped as malformed
    pub decode_errors: u64,
    /// Interrupted signals from the server
    pub interruptions: u64,
}

/// Counters shared with the capture callback
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub decode_errors: AtomicU64,
    pub interruptions: AtomicU64,
}

impl SessionCounters {
    pub fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_dropped,
            &self.chunks_scheduled,
            &self.decode_errors,
            &self.interruptions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}
