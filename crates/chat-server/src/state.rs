//! Application State

use std::sync::Arc;

use chat_core::{ContextAssembler, ConversationEngine, EngineConfig, GenerationOptions, LlmProvider};
use chat_runtime::ServerCommand;

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// LLM provider (Anthropic, Ollama)
    pub provider: Arc<dyn LlmProvider>,

    /// How to launch the tool server; one process per request
    pub tool_server: Arc<ServerCommand>,

    pub config: Arc<ServerConfig>,

    pub assembler: ContextAssembler,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tool_server: ServerCommand,
        config: ServerConfig,
    ) -> Self {
        Self {
            assembler: ContextAssembler::new(config.attachment_budget),
            provider,
            tool_server: Arc::new(tool_server),
            config: Arc::new(config),
        }
    }

    /// Engine for one turn against `model`
    pub fn engine(&self, model: &str) -> ConversationEngine {
        let generation = GenerationOptions {
            model: model.to_string(),
            max_tokens: self.config.max_output_tokens,
            temperature: None,
            system_prompt: self.config.system_prompt.clone(),
        };

        ConversationEngine::new(
            self.provider.clone(),
            EngineConfig {
                generation,
                max_rounds: self.config.max_tool_rounds,
                parallel_tool_calls: self.config.parallel_tool_calls,
            },
        )
    }

    /// Requested model or the configured default
    pub fn model_or_default(&self, requested: Option<String>) -> String {
        requested
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.default_model.clone())
    }
}
