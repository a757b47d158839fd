//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference with native
//! tool calls, through `ollama-rs`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chat_core::{
    error::{AgentError, Result},
    message::{ContentBlock, Message, MessageContent, Role},
    provider::{
        Completion, CompletionRequest, FinishReason, GenerationOptions, LlmProvider, ModelInfo,
        TokenUsage,
    },
    tool::ToolDescriptor,
};
use ollama_rs::{
    error::OllamaError,
    generation::{
        chat::{request::ChatMessageRequest, ChatMessage, ChatMessageResponse, MessageRole},
        tools::{ToolCall, ToolInfo},
    },
    models::ModelOptions,
    Ollama,
};
use serde_json::json;
use uuid::Uuid;

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self {
            host,
            port,
            ..Default::default()
        }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        // ollama-rs panics on a host it cannot parse
        reqwest::Url::parse(&config.host)
            .map_err(|e| AgentError::Config(format!("OLLAMA_HOST '{}': {e}", config.host)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client: Ollama::new_with_client(config.host.as_str(), config.port, http),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    fn build_request(request: &CompletionRequest<'_>) -> ChatMessageRequest {
        let options = request.options;
        let mut messages = Vec::new();
        if let Some(system) = &options.system_prompt {
            messages.push(ChatMessage::new(MessageRole::System, system.clone()));
        }
        messages.extend(Self::convert_messages(request.messages));

        let mut chat = ChatMessageRequest::new(options.model.clone(), messages)
            .options(Self::build_options(options));
        if !request.tools.is_empty() {
            chat = chat.tools(request.tools.iter().filter_map(tool_info).collect());
        }
        chat
    }

    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        let options = ModelOptions::default().num_predict(opts.max_tokens as i32);
        match opts.temperature {
            Some(temperature) => options.temperature(temperature),
            None => options,
        }
    }

    /// Flatten block messages: tool requests ride on the assistant message,
    /// each tool result becomes its own `tool` message named after the call
    /// it answers
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        let mut call_names: HashMap<&str, &str> = HashMap::new();

        for message in messages {
            let blocks = match &message.content {
                MessageContent::Text(text) => {
                    out.push(ChatMessage::new(role(message.role), text.clone()));
                    continue;
                }
                MessageContent::Blocks(blocks) => blocks,
            };

            match message.role {
                Role::Assistant => {
                    call_names.clear();
                    let mut converted = ChatMessage::new(MessageRole::Assistant, message.text());
                    converted.tool_calls = message
                        .tool_uses()
                        .filter_map(|(id, name, input)| {
                            call_names.insert(id, name);
                            tool_call(name, input)
                        })
                        .collect();
                    out.push(converted);
                }
                Role::User => {
                    for block in blocks {
                        match block {
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => {
                                let name = call_names
                                    .get(tool_use_id.as_str())
                                    .copied()
                                    .unwrap_or("unknown");
                                let body = json!({"tool_name": name, "content": content});
                                out.push(ChatMessage::new(MessageRole::Tool, body.to_string()));
                            }
                            ContentBlock::Text { text } => {
                                out.push(ChatMessage::new(MessageRole::User, text.clone()));
                            }
                            ContentBlock::ToolUse { .. } => {}
                        }
                    }
                }
            }
        }
        out
    }

    /// Convert Ollama response to a completion; tool calls get fresh ids
    fn convert_completion(response: ChatMessageResponse) -> Completion {
        let mut content = Vec::new();
        if !response.message.content.is_empty() {
            content.push(ContentBlock::text(response.message.content));
        }
        for call in response.message.tool_calls {
            content.push(ContentBlock::ToolUse {
                id: format!("call_{}", Uuid::new_v4().simple()),
                name: call.function.name,
                input: call.function.arguments,
            });
        }

        let has_tools = content.iter().any(ContentBlock::is_tool_use);

        Completion {
            content,
            model: response.model,
            usage: response.final_data.as_ref().map(|d| {
                let prompt = d.prompt_eval_count as u32;
                let completion = d.eval_count as u32;
                TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                }
            }),
            finish_reason: Some(if has_tools {
                FinishReason::ToolUse
            } else {
                FinishReason::Stop
            }),
        }
    }
}

fn role(role: Role) -> MessageRole {
    match role {
        Role::User => MessageRole::User,
        Role::Assistant => MessageRole::Assistant,
    }
}

fn tool_call(name: &str, input: &serde_json::Value) -> Option<ToolCall> {
    serde_json::from_value(json!({"function": {"name": name, "arguments": input}}))
        .map_err(|e| tracing::warn!(tool = %name, "Could not encode tool call: {}", e))
        .ok()
}

fn tool_info(tool: &ToolDescriptor) -> Option<ToolInfo> {
    serde_json::from_value(json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        },
    }))
    .map_err(|e| tracing::warn!(tool = %tool.name, "Skipping tool Ollama cannot describe: {}", e))
    .ok()
}

fn provider_error(e: OllamaError) -> AgentError {
    match e {
        OllamaError::ReqwestError(e) if e.is_timeout() || e.is_connect() => {
            AgentError::ProviderUnavailable(e.to_string())
        }
        other => AgentError::Provider(other.to_string()),
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        tracing::debug!(
            model = %request.options.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending Ollama request"
        );

        let response = self
            .client
            .send_chat_messages(Self::build_request(&request))
            .await
            .map_err(provider_error)?;

        Ok(Self::convert_completion(response))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
            })
            .collect())
    }
}
