//! Append-only JSON-lines transcript file
//!
//! One tagged record per line so a crash mid-write loses at most the
//! final line. History loads tolerate a trailing partial line for the
//! same reason.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use parley_core::{PresenceEvent, TurnMessage};

use crate::{PersistenceError, TurnStore};

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    Turn(TurnMessage),
    Presence(PresenceEvent),
}

/// JSONL-backed [`TurnStore`]
pub struct JsonlTurnStore {
    path: PathBuf,
}

impl JsonlTurnStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, record: &Record) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TurnStore for JsonlTurnStore {
    async fn save_message(&self, message: &TurnMessage) -> Result<(), PersistenceError> {
        self.append(&Record::Turn(message.clone())).await
    }

    async fn save_presence(&self, event: &PresenceEvent) -> Result<(), PersistenceError> {
        self.append(&Record::Presence(event.clone())).await
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<TurnMessage>, PersistenceError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut turns = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(Record::Turn(message)) => turns.push(message),
                Ok(Record::Presence(_)) => {}
                Err(err) => warn!(%err, "skipping unreadable transcript line"),
            }
        }

        let skip = turns.len().saturating_sub(limit);
        Ok(turns.split_off(skip))
    }
}
