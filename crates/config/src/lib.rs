//! Configuration for the parley voice-chat agent
//!
//! Settings load from `config/default`, an optional environment-specific
//! file, and `PARLEY__`-prefixed environment variables, in that order of
//! increasing priority.

mod settings;

pub use settings::{
    load_settings, AgentConfig, GenerationConfig, MergeConfig, SegmenterConfig, Settings,
    SynthesisConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
