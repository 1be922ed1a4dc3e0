//! Error types for the voice-chat agent

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the voice-chat agent
#[derive(Error, Debug)]
pub enum Error {
    // Pipeline stage errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Text generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Pipeline processing errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(u64),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Conversation ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Message not found: {0}")]
    NotFound(i64),

    #[error("No agent message to interrupt")]
    NoAgentMessage,

    #[error("Interrupt out of range: {requested} sentences, message has {available}")]
    InterruptOutOfRange { requested: usize, available: usize },
}

/// Text generation errors
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Bad response from generation service: {0}")]
    BadResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
