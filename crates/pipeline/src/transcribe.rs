//! Transcription stage
//!
//! Turns flushed utterances into messages, throwing away transcripts
//! that match known model hallucinations. Whether a new message should
//! be folded into a still-unanswered one is decided here too.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use parley_core::{is_hallucination, Result, TurnMessage, UtteranceAudio};

/// Speech-to-text seam
#[async_trait::async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe one complete utterance
    async fn transcribe(&self, utterance: &UtteranceAudio) -> Result<String>;
}

/// Transcribes utterances and filters hallucinated output
pub struct Transcriber {
    service: Arc<dyn TranscriptionService>,
}

impl Transcriber {
    pub fn new(service: Arc<dyn TranscriptionService>) -> Self {
        Self { service }
    }

    /// Returns `None` when the transcript is empty or a known hallucination
    pub async fn transcribe(&self, utterance: &UtteranceAudio) -> Result<Option<TurnMessage>> {
        let raw = self.service.transcribe(utterance).await?;
        let text = raw.trim();

        if is_hallucination(text) {
            debug!(
                speaker = utterance.participant_name.as_str(),
                text, "dropping hallucinated transcript"
            );
            return Ok(None);
        }

        let mut message = TurnMessage::new(
            utterance.participant_id,
            &utterance.participant_name,
            utterance.listener_ids.clone(),
            utterance.listener_names.clone(),
        )
        .with_text(text)
        .with_audio_bounds(utterance.started, utterance.ended);
        message.transcribed = Some(Utc::now());

        Ok(Some(message))
    }
}

/// A new message folds into a pending one when the same speaker resumed
/// within the merge gap of where the pending message's audio ended.
pub fn should_merge(pending: &TurnMessage, incoming: &TurnMessage, merge_gap_ms: u64) -> bool {
    if pending.speaker_id != incoming.speaker_id {
        return false;
    }
    let (Some(pending_end), Some(incoming_start)) = (pending.audio_end, incoming.audio_start)
    else {
        return false;
    };
    let gap = incoming_start.signed_duration_since(pending_end);
    gap.num_milliseconds() < merge_gap_ms as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_core::AudioFormat;
    use std::collections::HashSet;

    struct FixedTranscript(String);

    #[async_trait::async_trait]
    impl TranscriptionService for FixedTranscript {
        async fn transcribe(&self, _utterance: &UtteranceAudio) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn utterance() -> UtteranceAudio {
        let now = Utc::now();
        UtteranceAudio {
            participant_id: 1,
            participant_name: "alice".into(),
            samples: vec![0; 480],
            format: AudioFormat::voice_channel(),
            listener_ids: [1, 2].into(),
            listener_names: ["alice".to_string(), "bob".to_string()].into(),
            started: now - Duration::seconds(1),
            ended: now,
        }
    }

    fn msg(speaker: u64, start_offset_ms: i64, end_offset_ms: i64) -> TurnMessage {
        let base = Utc::now();
        TurnMessage::new(speaker, "alice", HashSet::new(), HashSet::new()).with_audio_bounds(
            base + Duration::milliseconds(start_offset_ms),
            base + Duration::milliseconds(end_offset_ms),
        )
    }

    #[tokio::test]
    async fn test_transcribes_to_message() {
        let stage = Transcriber::new(Arc::new(FixedTranscript("  hello there ".into())));
        let message = stage.transcribe(&utterance()).await.unwrap().unwrap();
        assert_eq!(message.text, "hello there");
        assert_eq!(message.speaker_name, "alice");
        assert!(message.transcribed.is_some());
        assert!(message.listener_ids.contains(&2));
    }

    #[tokio::test]
    async fn test_hallucination_dropped() {
        let stage = Transcriber::new(Arc::new(FixedTranscript("Thanks for watching!".into())));
        assert!(stage.transcribe(&utterance()).await.unwrap().is_none());

        let stage = Transcriber::new(Arc::new(FixedTranscript("   ".into())));
        assert!(stage.transcribe(&utterance()).await.unwrap().is_none());
    }

    #[test]
    fn test_merge_within_gap() {
        let pending = msg(1, 0, 1000);
        let incoming = msg(1, 2500, 3500);
        assert!(should_merge(&pending, &incoming, 2000));
    }

    #[test]
    fn test_no_merge_past_gap() {
        let pending = msg(1, 0, 1000);
        let incoming = msg(1, 3500, 4500);
        assert!(!should_merge(&pending, &incoming, 2000));
    }

    #[test]
    fn test_no_merge_at_exact_gap() {
        let pending = msg(1, 0, 1000);
        let incoming = msg(1, 3000, 4000);
        assert!(!should_merge(&pending, &incoming, 2000));
    }

    #[test]
    fn test_no_merge_across_speakers() {
        let pending = msg(1, 0, 1000);
        let incoming = msg(2, 1100, 2100);
        assert!(!should_merge(&pending, &incoming, 2000));
    }
}
