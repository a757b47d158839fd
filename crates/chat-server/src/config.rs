//! Server Configuration
//!
//! Read once at startup from the environment (after `.env` is loaded).

use std::str::FromStr;
use std::time::Duration;

use chat_core::context::DEFAULT_ATTACHMENT_BUDGET;
use chat_core::error::{AgentError, Result};

const DEFAULT_TURN_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2024;

/// Which model API backs the server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-3-7-sonnet-20250219",
            ProviderKind::Ollama => "llama3.2",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(AgentError::Config(format!(
                "unknown LLM_PROVIDER '{other}' (expected anthropic or ollama)"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub provider: ProviderKind,
    pub default_model: String,
    pub max_output_tokens: u32,

    /// Wall-clock ceiling on one turn, session setup included
    pub turn_timeout: Duration,

    /// Model calls allowed per turn; unbounded when `None`
    pub max_tool_rounds: Option<usize>,

    pub attachment_budget: usize,
    pub system_prompt: Option<String>,
    pub parallel_tool_calls: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("LLM_PROVIDER") {
            Some(value) => value.parse()?,
            None => ProviderKind::Anthropic,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            provider,
            default_model: get("DEFAULT_MODEL")
                .unwrap_or_else(|| provider.default_model().to_string()),
            max_output_tokens: parse(&get, "MAX_OUTPUT_TOKENS")?
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            turn_timeout: Duration::from_secs(
                parse(&get, "TURN_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TURN_TIMEOUT_SECS),
            ),
            max_tool_rounds: parse(&get, "MAX_TOOL_ROUNDS")?,
            attachment_budget: parse(&get, "ATTACHMENT_BUDGET_CHARS")?
                .unwrap_or(DEFAULT_ATTACHMENT_BUDGET),
            system_prompt: get("SYSTEM_PROMPT"),
            parallel_tool_calls: parse(&get, "PARALLEL_TOOL_CALLS")?.unwrap_or(false),
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("invalid {key}: '{value}'")))
        })
        .transpose()
}
