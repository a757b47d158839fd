//! Anthropic LLM Provider
//!
//! Implementation of `LlmProvider` for the Anthropic Messages API with
//! native tool use.

use std::time::Duration;

use async_trait::async_trait;
use chat_core::{
    error::{AgentError, Result},
    message::{ContentBlock, Message},
    provider::{
        Completion, CompletionRequest, FinishReason, LlmProvider, ModelInfo, TokenUsage,
    },
    tool::ToolDescriptor,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// API root, without the `/v1` suffix
    pub base_url: String,

    /// `anthropic-version` header
    pub version: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
            version: "2023-06-01".into(),
            timeout_secs: 120,
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(version) = std::env::var("ANTHROPIC_VERSION") {
            config.version = version;
        }
        if let Some(secs) = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_secs = secs;
        }
        Ok(config)
    }
}

/// Anthropic LLM provider
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create from configuration
    pub fn from_config(config: AnthropicConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(AnthropicConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.base_url)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint(path))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
    }

    /// Messages API request body
    fn build_body(request: &CompletionRequest<'_>) -> Value {
        let options = request.options;
        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "messages": Self::convert_messages(request.messages),
        });
        if let Some(system) = &options.system_prompt {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(Self::convert_tool).collect());
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    /// Content blocks already use the Messages API shapes
    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect()
    }

    fn convert_tool(tool: &ToolDescriptor) -> Value {
        json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema,
        })
    }

    fn convert_completion(response: ApiResponse) -> Completion {
        let content = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ApiContentBlock::ToolUse { id, name, input } => {
                    // a call without input is a call with no arguments
                    let input = if input.is_null() { json!({}) } else { input };
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                ApiContentBlock::Other => None,
            })
            .collect();

        Completion {
            content,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            finish_reason: response.stop_reason.as_deref().map(|reason| match reason {
                "end_turn" | "stop_sequence" => FinishReason::Stop,
                "max_tokens" => FinishReason::Length,
                "tool_use" => FinishReason::ToolUse,
                "refusal" => FinishReason::ContentFilter,
                _ => FinishReason::Error,
            }),
        }
    }

    async fn read_error(response: reqwest::Response) -> AgentError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        status_error(status, message)
    }
}

fn status_error(status: u16, message: String) -> AgentError {
    let message = format!("{status}: {message}");
    match status {
        401 | 403 => AgentError::Auth(message),
        429 => AgentError::RateLimited(message),
        500..=599 => AgentError::ProviderUnavailable(message),
        _ => AgentError::Provider(message),
    }
}

fn transport_error(e: &reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::ProviderUnavailable(e.to_string())
    } else {
        AgentError::Provider(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Thinking and other block kinds are not part of the conversation
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiModelList {
    #[serde(default)]
    data: Vec<ApiModel>,
}

#[derive(Debug, Deserialize)]
struct ApiModel {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "Anthropic"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Anthropic health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        let body = Self::build_body(&request);
        tracing::debug!(
            model = %request.options.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending Anthropic request"
        );

        let response = self
            .post("messages")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Protocol(format!("unreadable Anthropic response: {e}")))?;
        Ok(Self::convert_completion(parsed))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let list: ApiModelList = response
            .json()
            .await
            .map_err(|e| AgentError::Protocol(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.display_name.unwrap_or_else(|| m.id.clone()),
                id: m.id,
            })
            .collect())
    }
}
