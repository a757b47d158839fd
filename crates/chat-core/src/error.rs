//! Error Types

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error types shared by the engine, the tool session and the providers
#[derive(Error, Debug)]
pub enum AgentError {
    /// Tool server failed to start or the initialize handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Tool server stream broke or the session is already closed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Tool server answered a request with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// A single tool call failed
    #[error("Tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    /// Model response was empty or malformed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// One catalog listing could not be fetched
    #[error("Could not list {category}: {message}")]
    CatalogFetch { category: String, message: String },

    /// Prompt template unknown to the tool server
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Caller-imposed round ceiling was exceeded
    #[error("Round limit ({0}) reached")]
    RoundLimit(usize),

    /// Caller-imposed deadline elapsed
    #[error("Turn timed out after {0} seconds")]
    Timeout(u64),

    /// Configuration or argument validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Build a tool error
    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Check if error is retryable.
    ///
    /// Nothing inside this workspace retries; the flag exists for policies
    /// wrapping a whole turn.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_)
                | AgentError::RateLimited(_)
                | AgentError::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Connection(_) => {
                "Failed to connect to the tool server. Please try again.".into()
            }
            AgentError::Transport(_) => "The tool server connection was lost.".into(),
            AgentError::Protocol(_) => "The AI service returned an unexpected response.".into(),
            AgentError::PromptNotFound(name) => format!("The prompt '{name}' is not available."),
            AgentError::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            AgentError::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            AgentError::Tool { name, message } => format!("Tool '{name}' failed: {message}"),
            AgentError::RoundLimit(_) | AgentError::Timeout(_) => {
                "The request took too long to process. Please try a simpler query.".into()
            }
            AgentError::RateLimited(_) => {
                "You've made too many requests. Please wait a moment.".into()
            }
            AgentError::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            AgentError::Config(msg) => format!("Invalid request: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
