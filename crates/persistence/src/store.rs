//! Turn storage trait and in-memory implementation

use parking_lot::RwLock;

use parley_core::{PresenceEvent, TurnMessage};

use crate::PersistenceError;

/// Durable storage seam for the live pipeline.
///
/// Failures are surfaced to the caller but must never stall the voice
/// loop; retry policy belongs to the implementation.
#[async_trait::async_trait]
pub trait TurnStore: Send + Sync {
    /// Persist a finalized turn
    async fn save_message(&self, message: &TurnMessage) -> Result<(), PersistenceError>;

    /// Persist a join/leave event
    async fn save_presence(&self, event: &PresenceEvent) -> Result<(), PersistenceError>;

    /// Prior conversation, oldest first, at most `limit` entries
    async fn load_history(&self, limit: usize) -> Result<Vec<TurnMessage>, PersistenceError>;
}

/// Keeps everything in process memory. Suitable for tests and for
/// deployments that do not want durable transcripts.
#[derive(Default)]
pub struct MemoryTurnStore {
    messages: RwLock<Vec<TurnMessage>>,
    presence: RwLock<Vec<PresenceEvent>>,
}

impl MemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<TurnMessage> {
        self.messages.read().clone()
    }

    pub fn presence_events(&self) -> Vec<PresenceEvent> {
        self.presence.read().clone()
    }
}

#[async_trait::async_trait]
impl TurnStore for MemoryTurnStore {
    async fn save_message(&self, message: &TurnMessage) -> Result<(), PersistenceError> {
        self.messages.write().push(message.clone());
        Ok(())
    }

    async fn save_presence(&self, event: &PresenceEvent) -> Result<(), PersistenceError> {
        self.presence.write().push(event.clone());
        Ok(())
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<TurnMessage>, PersistenceError> {
        let messages = self.messages.read();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }
}
