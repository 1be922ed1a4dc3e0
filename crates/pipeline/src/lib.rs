//! Audio pipeline stages
//!
//! This crate provides the stages between raw audio frames and spoken
//! replies:
//! - Turn segmentation with silence-gap reconstruction and barge-in
//! - Transcription with hallucination filtering and merge policy
//! - Playback feed with interrupt support

pub mod playback;
pub mod segmenter;
pub mod transcribe;

pub use playback::{PlaybackFeed, PlaybackSink, SpeechSynthesizer};
pub use segmenter::{SegmenterTick, TurnSegmenter};
pub use transcribe::{should_merge, Transcriber, TranscriptionService};
