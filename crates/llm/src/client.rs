//! Text-generation service client
//!
//! Streams completions from an Ollama server over its NDJSON generate
//! endpoint. Connection failures and timeouts surface as "service
//! unavailable" so a dead model host skips the turn instead of wedging
//! the pipeline.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use parley_config::GenerationConfig;
use parley_core::error::GenerationError;
use parley_core::Result;

use crate::prompt::Prompt;

/// Stream of text fragments from the generation service
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Text-generation seam
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start a streaming completion for a rendered prompt
    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream>;

    /// Exact prompt-token count for a piece of text
    async fn count_tokens(&self, text: &str) -> Result<u32>;
}

/// One line of the NDJSON generate response
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
}

/// Ollama `/api/generate` client in raw mode
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    config: GenerationConfig,
}

impl OllamaClient {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::ServiceUnavailable(e.to_string()))?;
        let base_url = format!("http://{}:{}", config.host, config.port);
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    fn request_body(&self, prompt: &str, num_predict: u32, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "raw": true,
            "stream": stream,
            "options": {
                "num_ctx": self.config.context_length,
                "num_predict": num_predict,
                "temperature": self.config.temperature,
            },
        })
    }

    fn send_error(err: reqwest::Error) -> GenerationError {
        if err.is_connect() || err.is_timeout() {
            GenerationError::ServiceUnavailable(err.to_string())
        } else {
            GenerationError::BadResponse(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for OllamaClient {
    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
        let body = self.request_body(&prompt.render(), self.config.max_response_tokens, true);
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::BadResponse(format!("{status}: {text}")).into());
        }

        let stream = async_stream::try_stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| GenerationError::Stream(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: GenerateChunk = serde_json::from_str(&line)
                        .map_err(|e| GenerationError::Stream(e.to_string()))?;
                    if !parsed.response.is_empty() {
                        yield parsed.response;
                    }
                    if parsed.done {
                        debug!(prompt_tokens = parsed.prompt_eval_count, "generation done");
                        break 'read;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn count_tokens(&self, text: &str) -> Result<u32> {
        // zero-token generation evaluates the prompt without producing output
        let body = self.request_body(text, 0, false);
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(Self::send_error)?;

        if !response.status().is_success() {
            return Err(GenerationError::BadResponse(response.status().to_string()).into());
        }

        let parsed: GenerateChunk = response
            .json()
            .await
            .map_err(|e| GenerationError::BadResponse(e.to_string()))?;
        parsed
            .prompt_eval_count
            .ok_or_else(|| GenerationError::BadResponse("missing prompt_eval_count".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_parsing() {
        let mid: GenerateChunk = serde_json::from_str(r#"{"response":"Hel","done":false}"#).unwrap();
        assert_eq!(mid.response, "Hel");
        assert!(!mid.done);

        let last: GenerateChunk =
            serde_json::from_str(r#"{"response":"","done":true,"prompt_eval_count":42}"#).unwrap();
        assert!(last.done);
        assert_eq!(last.prompt_eval_count, Some(42));
    }

    #[test]
    fn test_request_body_options() {
        let client = OllamaClient::new(GenerationConfig::default()).unwrap();
        let body = client.request_body("hi", 300, true);
        assert_eq!(body["raw"], true);
        assert_eq!(body["options"]["num_predict"], 300);
        assert_eq!(body["options"]["num_ctx"], 16384);
    }
}
