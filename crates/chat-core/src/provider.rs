//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for tool-calling LLM providers (Anthropic,
//! Ollama, ...) so the conversation engine works with any backend.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_core::provider::{CompletionRequest, GenerationOptions, LlmProvider};
//!
//! let options = GenerationOptions::for_model("claude-3-7-sonnet-20250219");
//! let request = CompletionRequest::new(history.messages(), &tools, &options);
//! let completion = provider.complete(request).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ContentBlock, Message};
use crate::tool::ToolDescriptor;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "claude-3-7-sonnet-20250219", "llama3.2")
    pub model: String,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for sampling; provider default when unset
    #[serde(default)]
    pub temperature: Option<f32>,

    /// System prompt, sent apart from the history
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_tokens() -> u32 {
    2024
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "claude-3-7-sonnet-20250219".into(),
            max_tokens: default_max_tokens(),
            temperature: None,
            system_prompt: None,
        }
    }
}

impl GenerationOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

/// Everything a provider needs for one completion
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    /// Full history, oldest first
    pub messages: &'a [Message],

    /// Tools offered for this call
    pub tools: &'a [ToolDescriptor],

    pub options: &'a GenerationOptions,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(
        messages: &'a [Message],
        tools: &'a [ToolDescriptor],
        options: &'a GenerationOptions,
    ) -> Self {
        Self {
            messages,
            tools,
            options,
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// Content blocks in response order
    pub content: Vec<ContentBlock>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Single-text-block completion
    pub fn text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            model: model.into(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The engine works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs (e.g., "Anthropic")
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion for the request
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}
