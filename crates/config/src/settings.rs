//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Turn segmentation configuration
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Transcript merge configuration
    #[serde(default)]
    pub merge: MergeConfig,

    /// Text generation configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Agent behavior configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.privacy_level > 4 {
            return Err(ConfigError::InvalidValue {
                field: "agent.privacy_level".to_string(),
                message: "privacy level must be 0-4".to_string(),
            });
        }

        if self.segmenter.interrupt_threshold_ms >= self.segmenter.end_speaking_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "segmenter.interrupt_threshold_ms".to_string(),
                message: "interrupt threshold must be shorter than the end-speaking delay"
                    .to_string(),
            });
        }

        if self.segmenter.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "segmenter.tick_ms".to_string(),
                message: "tick interval cannot be zero".to_string(),
            });
        }

        if self.generation.max_response_tokens >= self.generation.context_length {
            return Err(ConfigError::InvalidValue {
                field: "generation.max_response_tokens".to_string(),
                message: "response budget must leave room for the prompt".to_string(),
            });
        }

        Ok(())
    }
}

/// Turn segmenter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Silence after the last frame before an utterance is flushed (ms)
    #[serde(default = "default_end_speaking_delay")]
    pub end_speaking_delay_ms: u64,

    /// Shortest utterance worth transcribing (ms of buffered audio)
    #[serde(default = "default_min_utterance")]
    pub min_utterance_ms: u64,

    /// Speech duration that triggers a barge-in while the agent talks (ms)
    #[serde(default = "default_interrupt_threshold")]
    pub interrupt_threshold_ms: u64,

    /// Monitor tick interval (ms)
    #[serde(default = "default_tick")]
    pub tick_ms: u64,

    /// Transport frame duration, used to size gap-fill silence (ms)
    #[serde(default = "default_frame")]
    pub frame_ms: u64,
}

fn default_end_speaking_delay() -> u64 {
    200
}
fn default_min_utterance() -> u64 {
    500
}
fn default_interrupt_threshold() -> u64 {
    100
}
fn default_tick() -> u64 {
    100
}
fn default_frame() -> u64 {
    20
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            end_speaking_delay_ms: default_end_speaking_delay(),
            min_utterance_ms: default_min_utterance(),
            interrupt_threshold_ms: default_interrupt_threshold(),
            tick_ms: default_tick(),
            frame_ms: default_frame(),
        }
    }
}

/// Transcript merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Two utterances from one speaker closer than this merge into a single
    /// turn (ms between the first's audio end and the second's audio start)
    #[serde(default = "default_merge_gap")]
    pub merge_gap_ms: u64,
}

fn default_merge_gap() -> u64 {
    2000
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            merge_gap_ms: default_merge_gap(),
        }
    }
}

/// Text generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Generation server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Generation server port
    #[serde(default = "default_llm_port")]
    pub port: u16,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window in tokens
    #[serde(default = "default_context_length")]
    pub context_length: u32,

    /// Response budget in tokens
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Outbound request timeout in seconds; expiry is treated as
    /// service-unavailable
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_llm_port() -> u16 {
    11434
}
fn default_model() -> String {
    "mistral:7b-instruct".to_string()
}
fn default_context_length() -> u32 {
    16384
}
fn default_max_response_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_llm_port(),
            model: default_model(),
            context_length: default_context_length(),
            max_response_tokens: default_max_response_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Voice model name
    #[serde(default = "default_voice_model")]
    pub voice_model: String,

    /// Speaker number within the voice model
    #[serde(default = "default_voice_number")]
    pub voice_number: u32,
}

fn default_voice_model() -> String {
    "en_GB-vctk-medium".to_string()
}
fn default_voice_number() -> u32 {
    8
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice_model: default_voice_model(),
            voice_number: default_voice_number(),
        }
    }
}

/// Agent behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name the agent speaks under
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Persona text injected into the system prompt
    #[serde(default)]
    pub persona: String,

    /// Which ledger entries are visible when assembling context (0-4):
    /// 0 everything, 1/2 union/intersection of listener-witnessed,
    /// 3/4 union/intersection scoped to current speakers
    #[serde(default = "default_privacy_level")]
    pub privacy_level: u8,

    /// Quiet time after the last flushed utterance before the agent answers
    /// whatever is pending (ms)
    #[serde(default = "default_speaker_pause")]
    pub speaker_pause_ms: u64,

    /// Persist interrupt markers into stored message text
    #[serde(default = "default_true")]
    pub track_interrupts: bool,
}

fn default_agent_name() -> String {
    "Parley".to_string()
}
fn default_privacy_level() -> u8 {
    1
}
fn default_speaker_pause() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            persona: String::new(),
            privacy_level: default_privacy_level(),
            speaker_pause_ms: default_speaker_pause(),
            track_interrupts: default_true(),
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (PARLEY__ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("PARLEY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.segmenter.end_speaking_delay_ms, 200);
        assert_eq!(settings.agent.privacy_level, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.agent.privacy_level = 5;
        assert!(settings.validate().is_err());

        settings.agent.privacy_level = 2;
        settings.segmenter.interrupt_threshold_ms = 400; // above the flush delay
        assert!(settings.validate().is_err());

        settings.segmenter.interrupt_threshold_ms = 100;
        assert!(settings.validate().is_ok());
    }
}
