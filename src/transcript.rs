//! Conversation transcript
//!
//! Interim text for the current turn accumulates per side in arrival order.
//! A turn-complete signal moves the interim pair into the append-only log.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// User and model text of one turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptTurn {
    pub user: String,
    pub model: String,
}

impl TranscriptTurn {
    pub fn new(user: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            model: model.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }
}

/// A finalized turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub index: usize,
    #[serde(flatten)]
    pub turn: TranscriptTurn,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    interim: TranscriptTurn,
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: &str) {
        self.interim.user.push_str(text);
    }

    pub fn append_model(&mut self, text: &str) {
        self.interim.model.push_str(text);
    }

    pub fn interim(&self) -> &TranscriptTurn {
        &self.interim
    }

    /// Finalize the interim pair and reset it. Returns the new entry, or
    /// `None` when neither side said anything this turn.
    pub fn complete_turn(&mut self) -> Option<&TranscriptEntry> {
        let turn = std::mem::take(&mut self.interim);
        if turn.is_empty() {
            return None;
        }
        self.entries.push(TranscriptEntry {
            index: self.entries.len(),
            turn,
            completed_at: Utc::now(),
        });
        self.entries.last()
    }

    /// Drop text of an unfinished turn
    pub fn discard_interim(&mut self) {
        self.interim = TranscriptTurn::default();
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.discard_interim();
        self.entries.clear();
    }

    /// Finalized turns as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}
