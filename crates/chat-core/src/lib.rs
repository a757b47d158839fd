//! # chat-core
//!
//! Conversation logic for a chat client that lets a language model call the
//! tools of an external tool server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ConversationEngine                         │
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │  Turn loop  │──│ ToolSession  │  │   LlmProvider        │  │
//! │  │ (TurnState) │  │  (Catalog)   │──│   (Strategy)         │  │
//! │  └─────────────┘  └──────────────┘  └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `LlmProvider` and `ToolSession` are the two seams: the runtime crate
//! supplies real model APIs and a stdio tool-server transport, tests supply
//! scripted doubles.

pub mod catalog;
pub mod context;
pub mod engine;
pub mod error;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use catalog::{Catalog, Category, ToolSelection};
pub use context::{AttachedContext, ContextAssembler};
pub use engine::{ConversationEngine, EngineBuilder, EngineConfig, TurnOutcome};
pub use error::{AgentError, Result};
pub use message::{ContentBlock, Conversation, Message, Role};
pub use prompt::PromptResolver;
pub use provider::{Completion, CompletionRequest, GenerationOptions, LlmProvider};
pub use session::ToolSession;
pub use tool::{ToolDescriptor, ToolInvocation, ToolOutput, ToolResult};
