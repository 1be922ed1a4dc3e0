//! Durable storage for the voice-chat agent
//!
//! Finished turns and join/leave events flow here once the live
//! pipeline is done with them; on startup the stored transcript seeds
//! the conversation ledger.

pub mod error;
pub mod file;
pub mod store;

pub use error::PersistenceError;
pub use file::JsonlTurnStore;
pub use store::{MemoryTurnStore, TurnStore};
