//! Core traits and types for the parley voice-chat agent
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frame and segment types
//! - Participant identity and the shared speaking set
//! - Conversational turn messages and interrupt events
//! - Hallucination filtering and text sanitation
//! - Error types

pub mod audio;
pub mod error;
pub mod message;
pub mod participant;
pub mod text;

pub use audio::{AudioFormat, AudioFrame, AudioSegment, UtteranceAudio};
pub use error::{Error, Result};
pub use message::{InterruptEvent, PresenceChange, PresenceEvent, TurnMessage};
pub use participant::{Participant, Roster, SpeakingSet};
pub use text::{is_hallucination, trim_non_alphanumeric, SENTENCE_SEPARATORS};
