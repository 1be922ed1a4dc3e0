//! Streaming text generation
//!
//! Prompt assembly over the conversation ledger, a streaming Ollama
//! client, and the response generator that turns token fragments into
//! spoken sentences with cooperative cancellation and interrupt markers.

pub mod client;
pub mod generator;
pub mod prompt;

pub use client::{OllamaClient, TextGenerator, TokenStream};
pub use generator::ResponseGenerator;
pub use prompt::{Prompt, PromptBuilder};
