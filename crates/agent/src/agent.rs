//! Voice conversation orchestrator
//!
//! Wires the pipeline stages together and runs them as independently
//! scheduled tasks: a segmenter tick loop, a transcription consumer,
//! the playback drain, and spawned response tasks. One failed turn
//! never stalls the others.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use parley_config::Settings;
use parley_core::{
    AudioFormat, AudioFrame, Error, InterruptEvent, Participant, PresenceChange, PresenceEvent,
    Result, Roster, SpeakingSet, TurnMessage, UtteranceAudio,
};
use parley_ledger::{ConversationLedger, PrivacyLevel};
use parley_llm::{PromptBuilder, ResponseGenerator, TextGenerator};
use parley_pipeline::{
    should_merge, PlaybackFeed, PlaybackSink, SpeechSynthesizer, Transcriber, TranscriptionService,
    TurnSegmenter,
};
use parley_persistence::TurnStore;

use crate::state::{AgentEvent, AgentState};

/// How much stored history seeds the ledger at startup
const HISTORY_SEED_LIMIT: usize = 100;

/// Heuristic token costs replaced per measurement pass
const MEASURE_BATCH: usize = 4;

/// One voice conversation: all stages plus their shared state
pub struct VoiceAgent {
    settings: Settings,
    roster: Roster,
    speaking: SpeakingSet,
    ledger: Arc<ConversationLedger>,
    segmenter: Mutex<TurnSegmenter>,
    transcriber: Transcriber,
    generator: Arc<ResponseGenerator>,
    playback: Arc<PlaybackFeed>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn TurnStore>,

    /// Ids of recorded turns awaiting a response
    pending: Mutex<Vec<i64>>,
    last_turn_at: Mutex<Instant>,
    utterance_tx: Mutex<Option<mpsc::UnboundedSender<UtteranceAudio>>>,
    utterance_rx: Mutex<Option<mpsc::UnboundedReceiver<UtteranceAudio>>>,

    transcribing: AtomicUsize,
    generating: AtomicBool,
    interrupted: AtomicBool,
    running: AtomicBool,

    state: Mutex<AgentState>,
    events: broadcast::Sender<AgentEvent>,
}

impl VoiceAgent {
    pub fn new(
        settings: Settings,
        agent_id: u64,
        transcription: Arc<dyn TranscriptionService>,
        text_generation: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn PlaybackSink>,
        store: Arc<dyn TurnStore>,
    ) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;
        let privacy = PrivacyLevel::try_from(settings.agent.privacy_level).map_err(Error::config)?;

        let roster = Roster::new();
        let speaking = SpeakingSet::new();
        let ledger = Arc::new(ConversationLedger::new());

        let segmenter = TurnSegmenter::new(
            settings.segmenter.clone(),
            AudioFormat::voice_channel(),
            roster.clone(),
            speaking.clone(),
        );
        let generator = ResponseGenerator::new(
            text_generation,
            ledger.clone(),
            PromptBuilder::new(settings.agent.name.as_str(), settings.agent.persona.as_str()),
            speaking.clone(),
            privacy,
            &settings.generation,
            agent_id,
        );
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            settings,
            roster,
            speaking,
            ledger,
            segmenter: Mutex::new(segmenter),
            transcriber: Transcriber::new(transcription),
            generator: Arc::new(generator),
            playback: Arc::new(PlaybackFeed::new(sink)),
            synthesizer,
            store,
            pending: Mutex::new(Vec::new()),
            last_turn_at: Mutex::new(Instant::now()),
            utterance_tx: Mutex::new(Some(utterance_tx)),
            utterance_rx: Mutex::new(Some(utterance_rx)),
            transcribing: AtomicUsize::new(0),
            generating: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            running: AtomicBool::new(false),
            state: Mutex::new(AgentState::Idle),
            events,
        })
    }

    /// Seed the ledger from storage and spawn the stage tasks
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match self.store.load_history(HISTORY_SEED_LIMIT).await {
            Ok(history) if !history.is_empty() => {
                info!(turns = history.len(), "seeding ledger from stored transcript");
                self.ledger.seed(history);
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "could not load stored history, starting empty"),
        }

        self.running.store(true, Ordering::Release);
        tokio::spawn(self.playback.clone().run());
        tokio::spawn(self.clone().transcription_loop());
        tokio::spawn(self.clone().tick_loop());
        tokio::spawn(self.clone().measurement_loop());
        Ok(())
    }

    /// Stop all stage tasks. Already-recorded turns stay in the ledger.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.utterance_tx.lock().take();
        self.playback.close();
    }

    /// Hand one inbound audio frame to the segmenter
    pub fn feed_frame(&self, frame: AudioFrame) {
        self.segmenter.lock().ingest(frame);
    }

    pub async fn participant_joined(&self, participant: Participant) {
        info!(id = participant.id, name = participant.name.as_str(), "participant joined");
        self.roster.join(&participant);
        let event = PresenceEvent {
            participant_id: participant.id,
            participant_name: participant.name,
            change: PresenceChange::Joined,
            at: Utc::now(),
        };
        if let Err(err) = self.store.save_presence(&event).await {
            warn!(%err, "failed to persist join event");
        }
    }

    pub async fn participant_left(&self, id: u64) {
        self.segmenter.lock().drop_participant(id);
        let Some(name) = self.roster.leave(id) else {
            return;
        };
        info!(id, name = name.as_str(), "participant left");
        let event = PresenceEvent {
            participant_id: id,
            participant_name: name,
            change: PresenceChange::Left,
            at: Utc::now(),
        };
        if let Err(err) = self.store.save_presence(&event).await {
            warn!(%err, "failed to persist leave event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn ledger(&self) -> &Arc<ConversationLedger> {
        &self.ledger
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn is_speaking(&self) -> bool {
        self.playback.pending_sentences() > 0
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.settings.segmenter.tick_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            self.on_tick().await;
        }
    }

    async fn on_tick(self: &Arc<Self>) {
        let agent_speaking =
            self.playback.pending_sentences() > 0 || self.generating.load(Ordering::Acquire);
        let tick = self.segmenter.lock().tick(Instant::now(), agent_speaking);

        if !tick.interrupts.is_empty() {
            self.handle_barge_in(tick.interrupts).await;
        }

        if let Some(tx) = self.utterance_tx.lock().as_ref() {
            for utterance in tick.utterances {
                let _ = tx.send(utterance);
            }
        }

        if self.ready_to_respond() {
            self.generating.store(true, Ordering::Release);
            self.interrupted.store(false, Ordering::Release);
            tokio::spawn(self.clone().respond_once());
        }

        self.refresh_state();
    }

    /// Cut playback, halt generation at the next sentence boundary, and
    /// mark the cut-off sentences on the last agent message.
    async fn handle_barge_in(&self, interrupters: Vec<Participant>) {
        self.generator.request_stop();
        let cut = self.playback.interrupt().await;
        self.interrupted.store(true, Ordering::Release);

        let event = InterruptEvent {
            num_sentences: cut,
            participants: interrupters.into_iter().map(|p| (p.id, p.name)).collect(),
        };
        info!(
            cut,
            by = event.marker_names().as_str(),
            "playback interrupted by barge-in"
        );

        if cut > 0 && self.settings.agent.track_interrupts {
            match self.generator.apply_interrupt(&event) {
                Ok(()) => self.persist_interrupted_message().await,
                Err(err) => warn!(%err, "interrupt marker not applied"),
            }
        }
        let _ = self.events.send(AgentEvent::Interrupted(event));
    }

    async fn transcription_loop(self: Arc<Self>) {
        let Some(mut rx) = self.utterance_rx.lock().take() else {
            return;
        };
        while let Some(utterance) = rx.recv().await {
            self.transcribing.fetch_add(1, Ordering::AcqRel);
            match self.transcriber.transcribe(&utterance).await {
                Ok(Some(message)) => self.commit_turn(message),
                Ok(None) => {}
                Err(err) => error!(
                    %err,
                    speaker = utterance.participant_name.as_str(),
                    "transcription failed, utterance dropped"
                ),
            }
            self.transcribing.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Fold the new turn into the newest pending one when the same speaker
    /// resumed within the merge gap; otherwise record it and enqueue it.
    fn commit_turn(&self, message: TurnMessage) {
        let mut pending = self.pending.lock();

        if let Some(&last_id) = pending.last() {
            if let Some(last) = self.ledger.get(last_id) {
                if should_merge(&last, &message, self.settings.merge.merge_gap_ms) {
                    let merged = self
                        .ledger
                        .update_with(last_id, |m| m.merge(&message.text, &message));
                    if merged.is_ok() {
                        debug!(id = last_id, "merged follow-up utterance");
                        *self.last_turn_at.lock() = Instant::now();
                        let _ = self.events.send(AgentEvent::TurnMerged { id: last_id });
                        return;
                    }
                }
            }
        }

        let id = self.ledger.record(message, false);
        pending.push(id);
        *self.last_turn_at.lock() = Instant::now();
        let _ = self.events.send(AgentEvent::TurnRecorded { id });
    }

    /// Respond only when the channel has settled: nothing buffering, nothing
    /// transcribing, nothing playing, and the pause window has elapsed.
    fn ready_to_respond(&self) -> bool {
        !self.pending.lock().is_empty()
            && self.speaking.is_empty()
            && self.transcribing.load(Ordering::Acquire) == 0
            && !self.generating.load(Ordering::Acquire)
            && self.playback.pending_sentences() == 0
            && self.last_turn_at.lock().elapsed()
                >= Duration::from_millis(self.settings.agent.speaker_pause_ms)
    }

    async fn respond_once(self: Arc<Self>) {
        let ids: Vec<i64> = std::mem::take(&mut *self.pending.lock());
        let (tx, rx) = mpsc::channel::<String>(32);
        let pump = tokio::spawn(self.clone().synthesis_pump(rx));

        let outcome = self.generator.respond(&ids, &tx).await;
        drop(tx);
        let synth_window = pump.await.unwrap_or(None);

        match outcome {
            Ok(Some(id)) => {
                if let Some((start, end)) = synth_window {
                    let _ = self.ledger.update_with(id, |m| {
                        m.synthesis_start = Some(start);
                        m.synthesis_end = Some(end);
                    });
                }
                self.persist_response(id, &ids).await;
                let _ = self.events.send(AgentEvent::ResponseRecorded { id });
            }
            Ok(None) => debug!("response produced no text, turn skipped"),
            Err(err) => error!(%err, "response generation failed, turn skipped"),
        }
        self.generating.store(false, Ordering::Release);
    }

    /// Synthesize sentences as they arrive and queue them for playback.
    /// A synthesis failure abandons the rest of the response.
    async fn synthesis_pump(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<String>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut started = None;
        while let Some(sentence) = rx.recv().await {
            started.get_or_insert_with(Utc::now);
            match self
                .synthesizer
                .synthesize(&sentence, &self.settings.synthesis)
                .await
            {
                Ok(segment) => self.playback.push(segment),
                Err(err) => {
                    error!(%err, "synthesis failed, abandoning rest of response");
                    break;
                }
            }
        }
        started.map(|s| (s, Utc::now()))
    }

    /// Re-persist the last agent message after its interrupt marker landed
    async fn persist_interrupted_message(&self) {
        let Some(id) = self.ledger.last_agent_message() else {
            return;
        };
        let Some(message) = self.ledger.get(id) else {
            return;
        };
        if let Err(err) = self.store.save_message(&message).await {
            warn!(%err, id, "failed to persist interrupted message");
        }
    }

    async fn persist_response(&self, response_id: i64, answered: &[i64]) {
        for id in answered.iter().chain(std::iter::once(&response_id)) {
            let Some(message) = self.ledger.get(*id) else {
                continue;
            };
            if let Err(err) = self.store.save_message(&message).await {
                warn!(%err, id, "failed to persist turn");
            }
        }
    }

    async fn measurement_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            // only spend model time on it while the conversation is quiet
            if self.speaking.is_empty() && !self.generating.load(Ordering::Acquire) {
                self.generator.measure_token_costs(MEASURE_BATCH).await;
            }
        }
    }

    fn refresh_state(&self) {
        if self.speaking.is_empty() {
            self.interrupted.store(false, Ordering::Release);
        }

        let new = if self.interrupted.load(Ordering::Acquire) {
            AgentState::Interrupted
        } else if self.playback.is_speaking() {
            AgentState::Speaking
        } else if self.generating.load(Ordering::Acquire) {
            AgentState::Generating
        } else if self.transcribing.load(Ordering::Acquire) > 0 {
            AgentState::Transcribing
        } else if !self.speaking.is_empty() {
            AgentState::Listening
        } else {
            AgentState::Idle
        };

        let mut state = self.state.lock();
        if *state != new {
            let old = *state;
            *state = new;
            drop(state);
            debug!(?old, ?new, "state changed");
            let _ = self.events.send(AgentEvent::StateChanged { old, new });
        }
    }
}
