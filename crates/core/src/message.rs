//! Conversational turn messages and interrupt events

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logical conversational contribution, possibly merged from several
/// utterances by the same speaker.
///
/// Ids are assigned by the ledger: live messages get strictly increasing ids
/// that are never reused; history seeded at startup gets ids strictly below
/// the live floor, inserted oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    /// Ledger-assigned id; 0 until recorded
    pub id: i64,

    /// Speaker
    pub speaker_id: u64,
    pub speaker_name: String,

    /// Everyone who witnessed this message
    pub listener_ids: HashSet<u64>,
    pub listener_names: HashSet<String>,

    /// Raw (possibly merged) text
    pub text: String,
    /// Optional grammar-corrected variant
    pub corrected_text: Option<String>,
    /// Marked-up variant produced when this message was barged in on,
    /// e.g. `first. (Alice)~~second. third.~~`. Canonical `text` is untouched.
    pub interrupted_text: Option<String>,

    /// Response sentences in spoken order (agent messages only)
    pub sentences: Vec<String>,

    /// Measured prompt-token cost; None until counted
    pub prompt_tokens: Option<u32>,

    /// Lifecycle timestamps
    pub created: DateTime<Utc>,
    pub audio_start: Option<DateTime<Utc>>,
    pub audio_end: Option<DateTime<Utc>>,
    pub transcribed: Option<DateTime<Utc>>,
    pub generated: Option<DateTime<Utc>>,
    pub synthesis_start: Option<DateTime<Utc>>,
    pub synthesis_end: Option<DateTime<Utc>>,

    /// Whether the agent has answered this message
    pub responded: bool,
    /// Id of the agent message that answered this one
    pub response_id: Option<i64>,
}

impl TurnMessage {
    /// Create a message for a speaker with the given listener snapshot
    pub fn new(
        speaker_id: u64,
        speaker_name: impl Into<String>,
        listener_ids: HashSet<u64>,
        listener_names: HashSet<String>,
    ) -> Self {
        Self {
            id: 0,
            speaker_id,
            speaker_name: speaker_name.into(),
            listener_ids,
            listener_names,
            text: String::new(),
            corrected_text: None,
            interrupted_text: None,
            sentences: Vec::new(),
            prompt_tokens: None,
            created: Utc::now(),
            audio_start: None,
            audio_end: None,
            transcribed: None,
            generated: None,
            synthesis_start: None,
            synthesis_end: None,
            responded: false,
            response_id: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_audio_bounds(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.audio_start = Some(start);
        self.audio_end = Some(end);
        self
    }

    /// Fold a follow-up utterance from the same speaker into this message:
    /// append the text, extend the audio window, union the listener sets.
    pub fn merge(&mut self, text: &str, other: &TurnMessage) {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
        if other.audio_end.is_some() {
            self.audio_end = other.audio_end;
        }
        if other.transcribed.is_some() {
            self.transcribed = other.transcribed;
        }
        self.listener_ids.extend(other.listener_ids.iter().copied());
        self.listener_names
            .extend(other.listener_names.iter().cloned());
    }

    /// Estimated prompt cost: measured if available, else length / 4
    pub fn token_cost(&self) -> u32 {
        self.prompt_tokens
            .unwrap_or_else(|| (self.text.len() / 4) as u32)
    }

    /// Latency from end of audio to transcription, if both are stamped
    pub fn stt_latency_ms(&self) -> Option<i64> {
        Some((self.transcribed? - self.audio_end?).num_milliseconds())
    }
}

/// A participant spoke over the agent while it was playing a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptEvent {
    /// Trailing sentences of the agent message that were cut off
    pub num_sentences: usize,
    /// Who barged in: (id, name)
    pub participants: Vec<(u64, String)>,
}

impl InterruptEvent {
    /// Interrupter names capitalized and comma-joined for the text marker
    pub fn marker_names(&self) -> String {
        self.participants
            .iter()
            .map(|(_, name)| {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Join/leave change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceChange {
    Joined,
    Left,
}

/// A participant joined or left the voice channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub participant_id: u64,
    pub participant_name: String,
    pub change: PresenceChange,
    pub at: DateTime<Utc>,
}
