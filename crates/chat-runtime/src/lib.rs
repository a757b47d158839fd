//! # chat-runtime
//!
//! Concrete implementations of the `chat-core` seams.
//!
//! ## Providers
//!
//! - **Anthropic**: Messages API with native tool use
//! - **Ollama**: local inference through `/api/chat` tool calls
//!
//! ## Tool servers
//!
//! - **Stdio**: the tool server runs as a child process speaking
//!   line-delimited JSON-RPC, typed with `rust-mcp-schema`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_runtime::{with_session, AnthropicProvider, ServerCommand};
//!
//! let engine = EngineBuilder::new()
//!     .provider(Arc::new(AnthropicProvider::from_env()?))
//!     .build()?;
//!
//! let mut history = Conversation::new();
//! let outcome = with_session(&ServerCommand::from_env(), |session| {
//!     Box::pin(async move {
//!         let catalog = Catalog::fetch(session).await;
//!         engine
//!             .run_turn(&mut history, "What is 2+2?", &catalog.tools, session)
//!             .await
//!     })
//! })
//! .await?;
//! println!("{}", outcome.text);
//! ```

pub mod anthropic;
pub mod ollama;
mod protocol;
pub mod stdio;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use stdio::{with_session, ServerCommand, StdioSession};

// Re-export core types for convenience
pub use chat_core::{
    AgentError, Catalog, ConversationEngine, EngineBuilder, LlmProvider, Message, Result, Role,
    ToolSession,
};
