//! Response generation
//!
//! Drives the streaming model and assembles fragments into spoken
//! sentences. Cancellation is cooperative: the stop flag and the
//! speaking set are checked at every sentence boundary, and whatever
//! was already produced is kept as the response.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_config::GenerationConfig;
use parley_core::error::LedgerError;
use parley_core::{
    trim_non_alphanumeric, InterruptEvent, Result, SpeakingSet, TurnMessage, SENTENCE_SEPARATORS,
};
use parley_ledger::{ConversationLedger, PrivacyLevel};

use crate::client::TextGenerator;
use crate::prompt::PromptBuilder;

/// Hallucinated opener like "3 minutes, 12 seconds" ahead of the reply
static DURATION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\d+\s+(?:hours?|minutes?|seconds?)\b[,\s]*)+").unwrap()
});

/// Streams model output into the ledger as spoken agent turns
pub struct ResponseGenerator {
    service: Arc<dyn TextGenerator>,
    ledger: Arc<ConversationLedger>,
    prompts: PromptBuilder,
    speaking: SpeakingSet,
    stop: AtomicBool,
    privacy: PrivacyLevel,
    context_length: u32,
    max_response_tokens: u32,
    agent_id: u64,
}

impl ResponseGenerator {
    pub fn new(
        service: Arc<dyn TextGenerator>,
        ledger: Arc<ConversationLedger>,
        prompts: PromptBuilder,
        speaking: SpeakingSet,
        privacy: PrivacyLevel,
        config: &GenerationConfig,
        agent_id: u64,
    ) -> Self {
        Self {
            service,
            ledger,
            prompts,
            speaking,
            stop: AtomicBool::new(false),
            privacy,
            context_length: config.context_length,
            max_response_tokens: config.max_response_tokens,
            agent_id,
        }
    }

    /// Ask playback-bound generation to halt at the next sentence boundary
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire) || !self.speaking.is_empty()
    }

    /// Generate a reply to the pending messages, pushing each finished
    /// sentence to `sentences_tx` as it completes. Returns the recorded
    /// agent message id, or `None` when generation produced nothing.
    pub async fn respond(
        &self,
        pending_ids: &[i64],
        sentences_tx: &mpsc::Sender<String>,
    ) -> Result<Option<i64>> {
        let pending: Vec<TurnMessage> = pending_ids
            .iter()
            .filter_map(|id| self.ledger.get(*id))
            .collect();
        if pending.is_empty() {
            return Ok(None);
        }

        let mut listener_ids = HashSet::new();
        let mut listener_names = HashSet::new();
        let mut speaker_ids = HashSet::new();
        for message in &pending {
            listener_ids.extend(message.listener_ids.iter().copied());
            listener_names.extend(message.listener_names.iter().cloned());
            speaker_ids.insert(message.speaker_id);
        }

        // the messages being answered always reach the prompt; history only
        // gets whatever budget they leave over
        let pending_cost: u32 = pending.iter().map(TurnMessage::token_cost).sum();
        let budget = self.context_length.saturating_sub(
            self.max_response_tokens + self.prompts.overhead_tokens() + pending_cost,
        );
        let answered: HashSet<i64> = pending_ids.iter().copied().collect();
        let mut context: Vec<TurnMessage> = self
            .ledger
            .history(&listener_ids, &speaker_ids, budget, self.privacy)
            .into_iter()
            .filter(|message| !answered.contains(&message.id))
            .collect();
        context.extend(pending.iter().cloned());
        let prompt = self.prompts.build(&context, &listener_names);

        self.stop.store(false, Ordering::Release);
        let mut stream = self.service.stream(&prompt).await?;

        let mut sentences: Vec<String> = Vec::new();
        let mut partial = String::new();
        let mut cancelled = false;

        'generation: while let Some(fragment) = stream.next().await {
            let fragment = match fragment {
                Ok(f) => f,
                Err(err) => {
                    warn!(%err, "generation stream failed mid-response");
                    cancelled = true;
                    break;
                }
            };
            for ch in fragment.chars() {
                if SENTENCE_SEPARATORS.contains(&ch) {
                    let raw = std::mem::take(&mut partial);
                    self.accept_sentence(raw, Some(ch), &mut sentences, sentences_tx)
                        .await;
                    if self.should_stop() {
                        cancelled = true;
                        break 'generation;
                    }
                } else {
                    partial.push(ch);
                }
            }
        }
        if !partial.is_empty() {
            self.accept_sentence(partial, None, &mut sentences, sentences_tx)
                .await;
        }

        let spoken: Vec<String> = sentences.into_iter().filter(|s| !s.is_empty()).collect();
        let text = spoken.join(" ");
        if text.is_empty() {
            debug!(cancelled, "generation produced no usable text");
            return Ok(None);
        }

        let mut message = TurnMessage::new(
            self.agent_id,
            self.prompts.agent_name(),
            listener_ids,
            listener_names,
        )
        .with_text(text);
        message.generated = Some(Utc::now());
        message.sentences = spoken;

        let id = self.ledger.record_agent(message);
        self.ledger.mark_responded(pending_ids, id);
        info!(id, cancelled, answered = pending_ids.len(), "recorded agent response");
        Ok(Some(id))
    }

    /// Post-process one raw sentence and, when it survives, store and emit it.
    ///
    /// Blank sentences collapse to at most one in a row and are never
    /// emitted. The first sentence additionally loses a leading echo of the
    /// agent's own name and any hallucinated duration phrase.
    async fn accept_sentence(
        &self,
        raw: String,
        terminal: Option<char>,
        sentences: &mut Vec<String>,
        sentences_tx: &mpsc::Sender<String>,
    ) {
        let mut text = raw.trim().to_string();

        if sentences.is_empty() && !text.is_empty() {
            let name = self.prompts.agent_name();
            // get() rather than slicing: the sentence may open mid-char
            if text.len() > name.len()
                && text
                    .get(..name.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(name))
            {
                text = text[name.len()..]
                    .trim_start_matches(':')
                    .trim_start()
                    .to_string();
            }
            text = DURATION_PREFIX.replace(&text, "").into_owned();
        }

        let suffix = terminal.filter(|c| *c != '\n');
        text = trim_non_alphanumeric(&text, suffix);

        if text.is_empty() {
            if sentences.last().is_some_and(|s| s.is_empty()) {
                return;
            }
            sentences.push(String::new());
            return;
        }

        let last_spoken = sentences.iter().rev().find(|s| !s.is_empty());
        if last_spoken == Some(&text) {
            debug!(text = text.as_str(), "dropping repeated sentence");
            return;
        }

        if sentences_tx.send(text.clone()).await.is_err() {
            debug!("sentence receiver dropped");
        }
        sentences.push(text);
    }

    /// Splice interrupt markers into the last agent message.
    ///
    /// The marked variant goes to `interrupted_text`; the canonical text the
    /// agent actually produced is left untouched. A count that does not fit
    /// the message is rejected and the ledger stays unchanged.
    pub fn apply_interrupt(&self, event: &InterruptEvent) -> Result<()> {
        let id = self
            .ledger
            .last_agent_message()
            .ok_or(LedgerError::NoAgentMessage)?;
        let names = event.marker_names();
        let requested = event.num_sentences;

        let spliced = self.ledger.update_with(id, |message| {
            let available = message.sentences.len();
            if requested == 0 || requested > available {
                return Err(LedgerError::InterruptOutOfRange {
                    requested,
                    available,
                });
            }
            let cut_from = available - requested;
            let spoken = message.sentences[..cut_from].join(" ");
            let cut = message.sentences[cut_from..].join(" ");
            message.interrupted_text = Some(if spoken.is_empty() {
                format!("({names})~~ {cut} ~~")
            } else {
                format!("{spoken} ({names})~~ {cut} ~~")
            });
            Ok(())
        })?;

        if let Err(err) = &spliced {
            warn!(%err, id, "interrupt marker rejected");
        }
        spliced?;
        Ok(())
    }

    /// Replace heuristic token costs with measured ones, a few per tick
    pub async fn measure_token_costs(&self, limit: usize) {
        for id in self.ledger.take_unmeasured(limit) {
            let Some(message) = self.ledger.get(id) else {
                continue;
            };
            match self.service.count_tokens(&message.text).await {
                Ok(tokens) => self.ledger.set_token_cost(id, tokens),
                Err(err) => debug!(%err, id, "token measurement failed, keeping heuristic"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TokenStream;
    use crate::prompt::Prompt;

    struct Scripted(Vec<&'static str>);

    #[async_trait::async_trait]
    impl TextGenerator for Scripted {
        async fn stream(&self, _prompt: &Prompt) -> Result<TokenStream> {
            let fragments: Vec<Result<String>> =
                self.0.iter().map(|s| Ok(s.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(fragments)))
        }

        async fn count_tokens(&self, text: &str) -> Result<u32> {
            Ok((text.len() / 4) as u32)
        }
    }

    /// Like [`Scripted`] but keeps the prompt it was streamed with
    struct Recording {
        fragments: Vec<&'static str>,
        prompt: std::sync::Mutex<Option<Prompt>>,
    }

    impl Recording {
        fn new(fragments: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                fragments,
                prompt: std::sync::Mutex::new(None),
            })
        }

        fn seen_prompt(&self) -> Prompt {
            self.prompt.lock().unwrap().clone().expect("stream never called")
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for Recording {
        async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
            *self.prompt.lock().unwrap() = Some(prompt.clone());
            let fragments: Vec<Result<String>> =
                self.fragments.iter().map(|s| Ok(s.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(fragments)))
        }

        async fn count_tokens(&self, text: &str) -> Result<u32> {
            Ok((text.len() / 4) as u32)
        }
    }

    fn generator(
        fragments: Vec<&'static str>,
        ledger: Arc<ConversationLedger>,
        speaking: SpeakingSet,
    ) -> ResponseGenerator {
        ResponseGenerator::new(
            Arc::new(Scripted(fragments)),
            ledger,
            PromptBuilder::new("Parley", "You are Parley."),
            speaking,
            PrivacyLevel::ListenerUnion,
            &GenerationConfig::default(),
            0,
        )
    }

    fn pending(ledger: &ConversationLedger, text: &str) -> i64 {
        let message = TurnMessage::new(
            1,
            "alice",
            [1].into(),
            ["alice".to_string()].into(),
        )
        .with_text(text);
        ledger.record(message, false)
    }

    fn agent_turn(ledger: &ConversationLedger, sentences: &[&str]) -> i64 {
        let mut message =
            TurnMessage::new(0, "Parley", HashSet::new(), HashSet::new())
                .with_text(sentences.join(" "));
        message.sentences = sentences.iter().map(|s| s.to_string()).collect();
        ledger.record_agent(message)
    }

    #[tokio::test]
    async fn test_sentences_streamed_and_recorded() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "what's the weather");
        let gen = generator(
            vec!["It is su", "nny today. Bring sun", "screen!"],
            ledger.clone(),
            SpeakingSet::new(),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let response_id = gen.respond(&[id], &tx).await.unwrap().unwrap();
        drop(tx);

        let mut streamed = Vec::new();
        while let Some(s) = rx.recv().await {
            streamed.push(s);
        }
        assert_eq!(streamed, vec!["It is sunny today.", "Bring sunscreen!"]);

        let recorded = ledger.get(response_id).unwrap();
        assert_eq!(recorded.text, "It is sunny today. Bring sunscreen!");
        assert_eq!(recorded.sentences.len(), 2);
        assert!(recorded.generated.is_some());
        assert_eq!(ledger.last_agent_message(), Some(response_id));

        let answered = ledger.get(id).unwrap();
        assert!(answered.responded);
        assert_eq!(answered.response_id, Some(response_id));
    }

    #[tokio::test]
    async fn test_first_sentence_cleanup() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "hello");
        let gen = generator(
            vec!["Parley: 3 minutes, 12 seconds Hello there. How are you?"],
            ledger.clone(),
            SpeakingSet::new(),
        );

        let (tx, mut rx) = mpsc::channel(16);
        gen.respond(&[id], &tx).await.unwrap().unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), "Hello there.");
        assert_eq!(rx.recv().await.unwrap(), "How are you?");
    }

    #[tokio::test]
    async fn test_multibyte_first_sentence_survives_name_check() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "hi");
        // opens mid-char at the agent-name byte length
        let gen = generator(vec!["a日日蛸 hello."], ledger.clone(), SpeakingSet::new());

        let (tx, mut rx) = mpsc::channel(16);
        gen.respond(&[id], &tx).await.unwrap().unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), "a日日蛸 hello.");
    }

    #[tokio::test]
    async fn test_pending_turns_always_reach_prompt() {
        let ledger = Arc::new(ConversationLedger::new());
        // one turn only alice witnessed, one turn both witnessed
        let a = ledger.record(
            TurnMessage::new(1, "alice", [1].into(), ["alice".to_string()].into())
                .with_text("only alice heard this"),
            false,
        );
        let b = ledger.record(
            TurnMessage::new(
                2,
                "bob",
                [1, 2].into(),
                ["alice".to_string(), "bob".to_string()].into(),
            )
            .with_text("everyone heard this"),
            false,
        );

        let service = Recording::new(vec!["Sure."]);
        let gen = ResponseGenerator::new(
            service.clone(),
            ledger.clone(),
            PromptBuilder::new("Parley", ""),
            SpeakingSet::new(),
            PrivacyLevel::ListenerIntersection,
            &GenerationConfig::default(),
            0,
        );

        let (tx, _rx) = mpsc::channel(16);
        gen.respond(&[a, b], &tx).await.unwrap().unwrap();

        // the intersection filter would exclude alice's turn from history,
        // but turns being answered are rendered regardless
        let transcript = service.seen_prompt().transcript;
        assert!(transcript.contains("only alice heard this"));
        assert!(transcript.contains("everyone heard this"));
        assert_eq!(transcript.matches("everyone heard this").count(), 1);
    }

    #[tokio::test]
    async fn test_tight_budget_drops_history_not_the_question() {
        let ledger = Arc::new(ConversationLedger::new());
        // 400 chars -> 100 tokens, more than the leftover history budget
        ledger.record(
            TurnMessage::new(1, "alice", [1].into(), ["alice".to_string()].into())
                .with_text("x".repeat(400)),
            false,
        );
        let id = pending(&ledger, "what about today");

        let service = Recording::new(vec!["Sunny."]);
        let config = GenerationConfig {
            context_length: 400,
            max_response_tokens: 300,
            ..GenerationConfig::default()
        };
        let gen = ResponseGenerator::new(
            service.clone(),
            ledger.clone(),
            PromptBuilder::new("Parley", ""),
            SpeakingSet::new(),
            PrivacyLevel::ListenerUnion,
            &config,
            0,
        );

        let (tx, _rx) = mpsc::channel(16);
        gen.respond(&[id], &tx).await.unwrap().unwrap();

        let transcript = service.seen_prompt().transcript;
        assert!(transcript.contains("what about today"));
        assert!(!transcript.contains("xxxx"));
    }

    #[tokio::test]
    async fn test_repeat_and_blank_collapse() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "hi");
        let gen = generator(
            vec!["Sure thing.\n\n\nSure thing. Anything else?"],
            ledger.clone(),
            SpeakingSet::new(),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let response_id = gen.respond(&[id], &tx).await.unwrap().unwrap();
        drop(tx);

        let mut streamed = Vec::new();
        while let Some(s) = rx.recv().await {
            streamed.push(s);
        }
        assert_eq!(streamed, vec!["Sure thing.", "Anything else?"]);
        assert_eq!(
            ledger.get(response_id).unwrap().text,
            "Sure thing. Anything else?"
        );
    }

    #[tokio::test]
    async fn test_cancelled_at_sentence_boundary() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "tell me a story");
        let speaking = SpeakingSet::new();
        speaking.add(7);
        let gen = generator(
            vec!["Once upon a time. There was a fox. The end."],
            ledger.clone(),
            speaking,
        );

        let (tx, mut rx) = mpsc::channel(16);
        let response_id = gen.respond(&[id], &tx).await.unwrap().unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), "Once upon a time.");
        assert!(rx.recv().await.is_none());
        assert_eq!(ledger.get(response_id).unwrap().text, "Once upon a time.");
    }

    #[tokio::test]
    async fn test_nothing_generated_records_nothing() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "hmm");
        let gen = generator(vec!["...\n"], ledger.clone(), SpeakingSet::new());

        let (tx, _rx) = mpsc::channel(16);
        assert!(gen.respond(&[id], &tx).await.unwrap().is_none());
        assert!(!ledger.get(id).unwrap().responded);
    }

    #[tokio::test]
    async fn test_apply_interrupt_splices_marker() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = agent_turn(&ledger, &["One.", "Two.", "Three.", "Four.", "Five."]);
        let gen = generator(vec![], ledger.clone(), SpeakingSet::new());

        let event = InterruptEvent {
            num_sentences: 2,
            participants: vec![(1, "alice".into()), (2, "bob".into())],
        };
        gen.apply_interrupt(&event).unwrap();

        let message = ledger.get(id).unwrap();
        assert_eq!(message.text, "One. Two. Three. Four. Five.");
        let marked = message.interrupted_text.unwrap();
        assert_eq!(marked, "One. Two. Three. (Alice, Bob)~~ Four. Five. ~~");
    }

    #[tokio::test]
    async fn test_apply_interrupt_out_of_range_rejected() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = agent_turn(&ledger, &["One.", "Two.", "Three.", "Four.", "Five."]);
        let gen = generator(vec![], ledger.clone(), SpeakingSet::new());

        let event = InterruptEvent {
            num_sentences: 6,
            participants: vec![(1, "alice".into())],
        };
        assert!(gen.apply_interrupt(&event).is_err());
        assert!(ledger.get(id).unwrap().interrupted_text.is_none());
    }

    #[tokio::test]
    async fn test_apply_interrupt_without_agent_message() {
        let ledger = Arc::new(ConversationLedger::new());
        let gen = generator(vec![], ledger, SpeakingSet::new());
        let event = InterruptEvent {
            num_sentences: 1,
            participants: vec![],
        };
        assert!(gen.apply_interrupt(&event).is_err());
    }

    #[tokio::test]
    async fn test_measure_token_costs() {
        let ledger = Arc::new(ConversationLedger::new());
        let id = pending(&ledger, "twelve chars");
        let gen = generator(vec![], ledger.clone(), SpeakingSet::new());

        gen.measure_token_costs(10).await;
        assert_eq!(ledger.get(id).unwrap().prompt_tokens, Some(3));
    }
}
