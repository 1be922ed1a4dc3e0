//! Conversation state and observable events

use parley_core::InterruptEvent;

/// One conversation's lifecycle state.
///
/// Listening is re-entrant at any point since segmentation is per
/// participant rather than global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Nobody speaking, nothing pending
    Idle,
    /// At least one participant has an open utterance buffer
    Listening,
    /// Flushed utterances are being transcribed
    Transcribing,
    /// A response is streaming from the model
    Generating,
    /// A participant barged in on playback
    Interrupted,
    /// Synthesized audio is playing
    Speaking,
}

/// Observable conversation events, delivered over a broadcast channel
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChanged {
        old: AgentState,
        new: AgentState,
    },
    /// A participant turn reached the ledger
    TurnRecorded {
        id: i64,
    },
    /// An existing pending turn absorbed a follow-up utterance
    TurnMerged {
        id: i64,
    },
    /// The agent finished a reply
    ResponseRecorded {
        id: i64,
    },
    /// Playback was cut off by a barge-in
    Interrupted(InterruptEvent),
}
