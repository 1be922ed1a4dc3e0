//! Conversation ledger
//!
//! Append-only store of conversational turns plus a per-participant witness
//! index. The witness index drives privacy-scoped history queries: a
//! participant can only bring into context what they were present for.
//!
//! Live ids increase monotonically and are never reused. History seeded at
//! startup gets ids strictly below the live floor, oldest first.

mod privacy;

pub use privacy::PrivacyLevel;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use parley_core::error::LedgerError;
use parley_core::TurnMessage;

#[derive(Default)]
struct LedgerInner {
    /// id -> message, ordered
    messages: BTreeMap<i64, TurnMessage>,
    /// participant id -> ids of messages they witnessed
    witnessed: HashMap<u64, BTreeSet<i64>>,
    /// id of the most recent agent message
    last_agent_message: Option<i64>,
    /// messages awaiting an exact token count
    unmeasured: VecDeque<i64>,
}

impl LedgerInner {
    fn next_live_id(&self) -> i64 {
        self.messages.keys().next_back().map_or(1, |max| max + 1)
    }

    fn next_seed_id(&self) -> i64 {
        self.messages.keys().next().map_or(0, |min| min - 1)
    }

    fn index(&mut self, message: &TurnMessage) {
        for listener in &message.listener_ids {
            self.witnessed
                .entry(*listener)
                .or_default()
                .insert(message.id);
        }
    }
}

/// Append-only store of turn messages with a witness index
#[derive(Default)]
pub struct ConversationLedger {
    inner: Mutex<LedgerInner>,
}

impl ConversationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message and return its assigned id.
    ///
    /// With `prepend` the message is filed below the current id floor;
    /// callers prepending one-by-one must do so newest first. For a batch in
    /// chronological order use [`seed`](Self::seed).
    pub fn record(&self, mut message: TurnMessage, prepend: bool) -> i64 {
        let mut inner = self.inner.lock();
        message.id = if prepend {
            inner.next_seed_id()
        } else {
            inner.next_live_id()
        };
        let id = message.id;

        inner.index(&message);
        if message.prompt_tokens.is_none() && !message.text.is_empty() {
            inner.unmeasured.push_back(id);
        }
        inner.messages.insert(id, message);
        id
    }

    /// Record a live agent message and remember it as the interrupt target
    pub fn record_agent(&self, message: TurnMessage) -> i64 {
        let id = self.record(message, false);
        self.inner.lock().last_agent_message = Some(id);
        id
    }

    /// Insert prior history below the live id floor. `messages` must be in
    /// chronological order, oldest first.
    pub fn seed(&self, messages: Vec<TurnMessage>) {
        let mut inner = self.inner.lock();
        let floor = inner.messages.keys().next().copied().unwrap_or(0);
        let count = messages.len() as i64;
        for (offset, mut message) in messages.into_iter().enumerate() {
            message.id = floor - count + offset as i64;
            inner.index(&message);
            inner.messages.insert(message.id, message);
        }
        tracing::debug!(count, floor, "seeded ledger history");
    }

    /// Fetch a message by id
    pub fn get(&self, id: i64) -> Option<TurnMessage> {
        self.inner.lock().messages.get(&id).cloned()
    }

    /// Mutate a stored message in place. The witness index is refreshed in
    /// case the listener sets changed.
    pub fn update_with<R>(
        &self,
        id: i64,
        f: impl FnOnce(&mut TurnMessage) -> R,
    ) -> Result<R, LedgerError> {
        let mut inner = self.inner.lock();
        let mut message = inner
            .messages
            .remove(&id)
            .ok_or(LedgerError::NotFound(id))?;
        let result = f(&mut message);
        inner.index(&message);
        inner.messages.insert(id, message);
        Ok(result)
    }

    /// Mark input messages as answered by the given agent message
    pub fn mark_responded(&self, ids: &[i64], response_id: i64) {
        let mut inner = self.inner.lock();
        for id in ids {
            if let Some(message) = inner.messages.get_mut(id) {
                message.responded = true;
                message.response_id = Some(response_id);
            }
        }
    }

    /// Id of the most recent agent message, if any
    pub fn last_agent_message(&self) -> Option<i64> {
        self.inner.lock().last_agent_message
    }

    /// Privacy-scoped history, oldest to newest, trimmed to `max_tokens`.
    ///
    /// Selection stops once adding the next entry would exceed the budget.
    /// Entries without a measured token cost use the length/4 heuristic and
    /// are queued for asynchronous measurement.
    pub fn history(
        &self,
        listener_ids: &HashSet<u64>,
        speaker_ids: &HashSet<u64>,
        max_tokens: u32,
        privacy: PrivacyLevel,
    ) -> Vec<TurnMessage> {
        let mut inner = self.inner.lock();

        let selected: BTreeSet<i64> = match privacy {
            PrivacyLevel::Open => inner.messages.keys().copied().collect(),
            PrivacyLevel::ListenerUnion => Self::witnessed_union(&inner, listener_ids),
            PrivacyLevel::ListenerIntersection => {
                Self::witnessed_intersection(&inner, listener_ids)
            }
            PrivacyLevel::SpeakerUnion => Self::witnessed_union(&inner, speaker_ids),
            PrivacyLevel::SpeakerIntersection => {
                Self::witnessed_intersection(&inner, speaker_ids)
            }
        };

        let mut spent = 0u32;
        let mut out = Vec::new();
        let mut needs_measure = Vec::new();
        for id in selected {
            let Some(message) = inner.messages.get(&id) else {
                continue;
            };
            let cost = message.token_cost();
            if spent + cost > max_tokens {
                break;
            }
            spent += cost;
            if message.prompt_tokens.is_none() {
                needs_measure.push(id);
            }
            out.push(message.clone());
        }

        for id in needs_measure {
            if !inner.unmeasured.contains(&id) {
                inner.unmeasured.push_back(id);
            }
        }

        out
    }

    fn witnessed_union(inner: &LedgerInner, ids: &HashSet<u64>) -> BTreeSet<i64> {
        let mut out = BTreeSet::new();
        for id in ids {
            if let Some(seen) = inner.witnessed.get(id) {
                out.extend(seen.iter().copied());
            }
        }
        out
    }

    fn witnessed_intersection(inner: &LedgerInner, ids: &HashSet<u64>) -> BTreeSet<i64> {
        let mut iter = ids.iter();
        let Some(first) = iter.next() else {
            return BTreeSet::new();
        };
        let mut out = inner.witnessed.get(first).cloned().unwrap_or_default();
        for id in iter {
            let seen = inner.witnessed.get(id).cloned().unwrap_or_default();
            out.retain(|m| seen.contains(m));
        }
        out
    }

    /// Drain up to `limit` message ids awaiting a token count
    pub fn take_unmeasured(&self, limit: usize) -> Vec<i64> {
        let mut inner = self.inner.lock();
        let n = limit.min(inner.unmeasured.len());
        inner.unmeasured.drain(..n).collect()
    }

    /// Store a measured token cost
    pub fn set_token_cost(&self, id: i64, tokens: u32) {
        if let Some(message) = self.inner.lock().messages.get_mut(&id) {
            message.prompt_tokens = Some(tokens);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }
}
