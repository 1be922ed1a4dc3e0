//! Turn segmentation
//!
//! Accumulates audio frames per participant and flushes a complete
//! utterance once the speaker has stayed quiet past the end-of-speech
//! delay. Dropped frames are reconstructed as silence from sequence
//! gaps so utterance duration stays truthful.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use parley_config::SegmenterConfig;
use parley_core::{AudioFormat, AudioFrame, Participant, Roster, SpeakingSet, UtteranceAudio};

struct UtteranceBuffer {
    samples: Vec<i16>,
    last_sequence: u32,
    last_frame_at: Instant,
    first_frame_at: Instant,
    started: DateTime<Utc>,
    interrupt_sent: bool,
}

/// What one tick produced
#[derive(Default)]
pub struct SegmenterTick {
    /// Utterances whose speakers went quiet, long enough to keep
    pub utterances: Vec<UtteranceAudio>,
    /// Speakers who talked over agent playback past the interrupt threshold
    pub interrupts: Vec<Participant>,
}

/// Per-participant frame accumulator driven by a periodic tick
pub struct TurnSegmenter {
    config: SegmenterConfig,
    format: AudioFormat,
    roster: Roster,
    speaking: SpeakingSet,
    buffers: HashMap<u64, UtteranceBuffer>,
}

impl TurnSegmenter {
    pub fn new(
        config: SegmenterConfig,
        format: AudioFormat,
        roster: Roster,
        speaking: SpeakingSet,
    ) -> Self {
        Self {
            config,
            format,
            roster,
            speaking,
            buffers: HashMap::new(),
        }
    }

    /// Append a frame to the speaker's open utterance, opening one if
    /// needed. A sequence gap is filled with silence sized to the missing
    /// frames; out-of-order frames are dropped.
    pub fn ingest(&mut self, frame: AudioFrame) {
        let frame_samples = self.format.samples_for_ms(self.config.frame_ms);

        match self.buffers.get_mut(&frame.participant_id) {
            Some(buffer) => {
                if frame.sequence <= buffer.last_sequence {
                    debug!(
                        participant = frame.participant_id,
                        sequence = frame.sequence,
                        last = buffer.last_sequence,
                        "dropping out-of-order frame"
                    );
                    return;
                }
                let gap = (frame.sequence - buffer.last_sequence - 1) as usize;
                if gap > 0 {
                    buffer
                        .samples
                        .extend(std::iter::repeat(0i16).take(gap * frame_samples));
                }
                buffer.samples.extend_from_slice(&frame.samples);
                buffer.last_sequence = frame.sequence;
                buffer.last_frame_at = frame.received;
            }
            None => {
                self.speaking.add(frame.participant_id);
                self.buffers.insert(
                    frame.participant_id,
                    UtteranceBuffer {
                        samples: frame.samples,
                        last_sequence: frame.sequence,
                        last_frame_at: frame.received,
                        first_frame_at: frame.received,
                        started: Utc::now(),
                        interrupt_sent: false,
                    },
                );
            }
        }
    }

    /// Flush buffers whose speakers have gone quiet and report barge-ins.
    ///
    /// Utterances shorter than the minimum length are discarded. While the
    /// agent is speaking, each open buffer alive past the interrupt
    /// threshold reports its speaker once.
    pub fn tick(&mut self, now: Instant, agent_speaking: bool) -> SegmenterTick {
        let mut out = SegmenterTick::default();

        let end_delay = Duration::from_millis(self.config.end_speaking_delay_ms);
        let interrupt_after = Duration::from_millis(self.config.interrupt_threshold_ms);

        if agent_speaking {
            for (id, buffer) in &mut self.buffers {
                if !buffer.interrupt_sent
                    && now.duration_since(buffer.first_frame_at) >= interrupt_after
                {
                    buffer.interrupt_sent = true;
                    let name = self.roster.name_of(*id).unwrap_or_else(|| id.to_string());
                    out.interrupts.push(Participant::new(*id, name));
                }
            }
        }

        let finished: Vec<u64> = self
            .buffers
            .iter()
            .filter(|(_, b)| now.duration_since(b.last_frame_at) >= end_delay)
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            let Some(buffer) = self.buffers.remove(&id) else {
                continue;
            };
            self.speaking.remove(id);

            let duration_ms = self.format.ms_for_samples(buffer.samples.len());
            if duration_ms < self.config.min_utterance_ms {
                debug!(participant = id, duration_ms, "discarding short utterance");
                continue;
            }

            let Some(name) = self.roster.name_of(id) else {
                warn!(participant = id, "utterance from speaker not in roster");
                continue;
            };
            let (listener_ids, listener_names) = self.roster.snapshot();

            out.utterances.push(UtteranceAudio {
                participant_id: id,
                participant_name: name,
                samples: buffer.samples,
                format: self.format,
                listener_ids,
                listener_names,
                started: buffer.started,
                ended: Utc::now(),
            });
        }

        out
    }

    /// Discard any open buffer for a participant who left
    pub fn drop_participant(&mut self, id: u64) {
        if self.buffers.remove(&id).is_some() {
            self.speaking.remove(id);
        }
    }

    pub fn open_buffers(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1000 samples per second, mono, so durations read off sample counts
    fn test_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 1000,
            channels: 1,
            sample_width: 2,
        }
    }

    fn test_config() -> SegmenterConfig {
        SegmenterConfig {
            end_speaking_delay_ms: 200,
            min_utterance_ms: 500,
            interrupt_threshold_ms: 100,
            tick_ms: 100,
            frame_ms: 20,
        }
    }

    fn segmenter() -> TurnSegmenter {
        let roster = Roster::new();
        roster.join(&Participant::new(1, "alice"));
        roster.join(&Participant::new(2, "bob"));
        TurnSegmenter::new(test_config(), test_format(), roster, SpeakingSet::new())
    }

    fn frame(participant: u64, sequence: u32, samples: usize, at: Instant) -> AudioFrame {
        AudioFrame {
            participant_id: participant,
            sequence,
            samples: vec![100i16; samples],
            received: at,
        }
    }

    #[test]
    fn test_flush_after_silence() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        // 600ms of audio in 20ms frames
        for i in 0..30 {
            seg.ingest(frame(1, i, 20, t0 + Duration::from_millis(20 * i as u64)));
        }
        assert!(seg.speaking.contains(1));

        // not quiet long enough yet
        let tick = seg.tick(t0 + Duration::from_millis(700), false);
        assert!(tick.utterances.is_empty());

        let tick = seg.tick(t0 + Duration::from_millis(800), false);
        assert_eq!(tick.utterances.len(), 1);
        let utterance = &tick.utterances[0];
        assert_eq!(utterance.participant_name, "alice");
        assert_eq!(utterance.samples.len(), 600);
        assert!(utterance.listener_ids.contains(&2));
        assert!(!seg.speaking.contains(1));
    }

    #[test]
    fn test_short_utterance_discarded() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        seg.ingest(frame(1, 0, 20, t0));
        let tick = seg.tick(t0 + Duration::from_millis(300), false);
        assert!(tick.utterances.is_empty());
        assert_eq!(seg.open_buffers(), 0);
        assert!(!seg.speaking.contains(1));
    }

    #[test]
    fn test_sequence_gap_filled_with_silence() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        seg.ingest(frame(1, 0, 20, t0));
        // frames 1 and 2 lost, 2 * 20 samples of silence expected
        seg.ingest(frame(1, 3, 20, t0 + Duration::from_millis(60)));

        // pad to minimum length
        for i in 4..30 {
            seg.ingest(frame(1, i, 20, t0 + Duration::from_millis(20 * i as u64)));
        }

        let tick = seg.tick(t0 + Duration::from_secs(2), false);
        assert_eq!(tick.utterances.len(), 1);
        let samples = &tick.utterances[0].samples;
        assert_eq!(samples.len(), 20 + 40 + 20 + 26 * 20);
        assert!(samples[20..60].iter().all(|&s| s == 0));
        assert_eq!(samples[60], 100);
    }

    #[test]
    fn test_out_of_order_frame_dropped() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        seg.ingest(frame(1, 5, 20, t0));
        seg.ingest(frame(1, 3, 20, t0 + Duration::from_millis(20)));
        seg.ingest(frame(1, 6, 20, t0 + Duration::from_millis(40)));

        let tick = seg.tick(t0 + Duration::from_secs(2), false);
        // 40 samples total, under the minimum, discarded
        assert!(tick.utterances.is_empty());
    }

    #[test]
    fn test_interrupt_fires_once_per_utterance() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        seg.ingest(frame(1, 0, 20, t0));
        seg.ingest(frame(1, 1, 20, t0 + Duration::from_millis(20)));

        // too young for an interrupt
        let tick = seg.tick(t0 + Duration::from_millis(50), true);
        assert!(tick.interrupts.is_empty());

        seg.ingest(frame(1, 2, 20, t0 + Duration::from_millis(40)));
        let tick = seg.tick(t0 + Duration::from_millis(150), true);
        assert_eq!(tick.interrupts.len(), 1);
        assert_eq!(tick.interrupts[0].name, "alice");

        // same utterance never reports twice
        seg.ingest(frame(1, 3, 20, t0 + Duration::from_millis(160)));
        let tick = seg.tick(t0 + Duration::from_millis(250), true);
        assert!(tick.interrupts.is_empty());
    }

    #[test]
    fn test_no_interrupt_when_agent_idle() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        seg.ingest(frame(1, 0, 20, t0));
        let tick = seg.tick(t0 + Duration::from_millis(150), false);
        assert!(tick.interrupts.is_empty());
    }

    #[test]
    fn test_drop_participant_clears_buffer() {
        let mut seg = segmenter();
        let t0 = Instant::now();

        seg.ingest(frame(1, 0, 20, t0));
        assert!(seg.speaking.contains(1));
        seg.drop_participant(1);
        assert!(!seg.speaking.contains(1));
        assert_eq!(seg.open_buffers(), 0);
    }
}
