//! LLM client module
//!
//! Provides the model-provider contract and the HTTP client for
//! OpenAI-compatible chat completion APIs.

pub mod chat;
pub mod client;

pub use chat::{
    ChatFunction, ChatMessage, ChatRequest, ChatResponse, ChatTool, Choice, MessageRole,
    StreamEvent, ToolCall, Usage,
};
pub use client::LlmClient;

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_max_tokens() -> Option<u32> {
    Some(4096)
}

fn default_temperature() -> Option<f32> {
    Some(0.7)
}

/// LLM Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API endpoint base URL (e.g. `http://localhost:11434/v1`)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// API key (if required)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Frequency penalty
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    /// Presence penalty
    #[serde(default)]
    pub presence_penalty: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig::new(default_base_url(), default_model(), None)
    }
}

impl LlmConfig {
    /// Create a new LLM config
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        LlmConfig {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            max_tokens: Some(4096),
            temperature: Some(0.7),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    /// Set maximum tokens
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp.clamp(0.0, 2.0));
        self
    }
}

/// An ordered, cancellable push sequence of streaming events
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Contract against the model provider.
///
/// The agent loop and the history compactor talk to this trait rather than to
/// [`LlmClient`] directly so tests can substitute scripted providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a chat request and get the full response
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Send a chat request and consume the response as an ordered stream
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream>;

    /// The model this provider talks to
    fn model(&self) -> &str;
}
