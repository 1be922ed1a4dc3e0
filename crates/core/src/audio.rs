//! Audio frame and segment types
//!
//! The voice transport delivers per-participant PCM frames with a
//! monotonically increasing sequence number. It does not deliver contiguous
//! silence: a sequence gap of N means N frames of silence were skipped.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// PCM format of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bytes per sample
    pub sample_width: u16,
}

impl AudioFormat {
    /// The voice transport's decoder output: 48 kHz, stereo, 16-bit
    pub const fn voice_channel() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            sample_width: 2,
        }
    }

    /// Samples covering `ms` milliseconds across all channels
    pub fn samples_for_ms(&self, ms: u64) -> usize {
        (self.sample_rate as u64 * self.channels as u64 * ms / 1000) as usize
    }

    /// Duration in milliseconds of `samples` interleaved samples
    pub fn ms_for_samples(&self, samples: usize) -> u64 {
        samples as u64 * 1000 / (self.sample_rate as u64 * self.channels as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::voice_channel()
    }
}

/// One inbound PCM frame from the voice transport
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Source participant
    pub participant_id: u64,
    /// Transport sequence number, monotonically increasing per participant
    pub sequence: u32,
    /// Interleaved PCM samples
    pub samples: Vec<i16>,
    /// Arrival time
    pub received: Instant,
}

impl AudioFrame {
    pub fn new(participant_id: u64, sequence: u32, samples: Vec<i16>) -> Self {
        Self {
            participant_id,
            sequence,
            samples,
            received: Instant::now(),
        }
    }
}

/// A flushed utterance: contiguous buffered audio from one participant
/// between silence boundaries, ready for transcription.
#[derive(Debug, Clone)]
pub struct UtteranceAudio {
    pub participant_id: u64,
    pub participant_name: String,
    pub samples: Vec<i16>,
    pub format: AudioFormat,
    /// Who was in the channel while this was spoken
    pub listener_ids: std::collections::HashSet<u64>,
    pub listener_names: std::collections::HashSet<String>,
    /// Wall-clock bounds of the audio
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
}

impl UtteranceAudio {
    /// Buffered length in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.format.ms_for_samples(self.samples.len())
    }
}

/// One synthesized audio segment queued for playback, covering a single
/// response sentence.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// The sentence this segment speaks
    pub text: String,
    pub samples: Vec<i16>,
    pub format: AudioFormat,
}
