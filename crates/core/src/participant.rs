//! Participant identity and shared channel state
//!
//! The speaking set is the single piece of cross-stage mutable state: it is
//! mutated only by the turn segmenter and read by the generator (cooperative
//! cancellation) and the agent loop (idle detection).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One participant in the voice channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Transport-assigned id, stable for the lifetime of the session
    pub id: u64,
    /// Display name
    pub name: String,
}

impl Participant {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The set of participants currently speaking.
///
/// Owned by the turn segmenter; everything else only reads it.
#[derive(Debug, Default, Clone)]
pub struct SpeakingSet {
    inner: Arc<RwLock<HashSet<u64>>>,
}

impl SpeakingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: u64) {
        self.inner.write().insert(id);
    }

    pub fn remove(&self, id: u64) {
        self.inner.write().remove(&id);
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.read().contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Snapshot of the currently speaking ids
    pub fn snapshot(&self) -> Vec<u64> {
        self.inner.read().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Current members of the voice channel, id -> display name.
///
/// Every message recorded while a participant is present lists them as a
/// listener; the roster is the source of those listener snapshots.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    inner: Arc<RwLock<HashMap<u64, String>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, participant: &Participant) {
        self.inner
            .write()
            .insert(participant.id, participant.name.clone());
    }

    pub fn leave(&self, id: u64) -> Option<String> {
        self.inner.write().remove(&id)
    }

    pub fn name_of(&self, id: u64) -> Option<String> {
        self.inner.read().get(&id).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot of (ids, names) for stamping a message's listener sets
    pub fn snapshot(&self) -> (HashSet<u64>, HashSet<String>) {
        let guard = self.inner.read();
        (
            guard.keys().copied().collect(),
            guard.values().cloned().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaking_set() {
        let set = SpeakingSet::new();
        assert!(set.is_empty());

        set.add(1);
        set.add(2);
        assert!(set.contains(1));
        assert_eq!(set.len(), 2);

        set.remove(1);
        assert!(!set.contains(1));
        assert!(!set.is_empty());
    }

    #[test]
    fn test_roster_snapshot() {
        let roster = Roster::new();
        roster.join(&Participant::new(1, "alice"));
        roster.join(&Participant::new(2, "bob"));

        let (ids, names) = roster.snapshot();
        assert!(ids.contains(&1) && ids.contains(&2));
        assert!(names.contains("alice") && names.contains("bob"));

        assert_eq!(roster.leave(1).as_deref(), Some("alice"));
        assert!(!roster.contains(1));
    }
}
