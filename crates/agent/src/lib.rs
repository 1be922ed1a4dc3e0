//! Voice conversation orchestrator
//!
//! Ties the pipeline together: segmentation, transcription, the
//! conversation ledger, streaming response generation, synthesis, and
//! playback with barge-in. Host applications feed audio frames and
//! presence changes in and receive events and playback out.

pub mod agent;
pub mod state;

pub use agent::VoiceAgent;
pub use state::{AgentEvent, AgentState};

// Re-export the seams a host needs to implement
pub use parley_core::{AudioFormat, AudioFrame, Participant};
pub use parley_llm::TextGenerator;
pub use parley_persistence::TurnStore;
pub use parley_pipeline::{PlaybackSink, SpeechSynthesizer, TranscriptionService};
