//! Tool Session
//!
//! The boundary to a live tool server. The stdio implementation lives in
//! `chat-runtime`; tests use in-memory doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{PromptDescriptor, ResourceDescriptor};
use crate::error::Result;
use crate::tool::{ToolDescriptor, ToolOutput};

/// One message of a rendered prompt template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub text: String,
}

/// What `getPrompt` returned
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPayload {
    /// A single rendered body
    Body(String),
    /// Ordered sub-messages
    Messages(Vec<PromptMessage>),
}

/// One item of a `readResource` response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceContent {
    Text {
        uri: String,
        mime_type: Option<String>,
        text: String,
    },
    Blob {
        uri: String,
        mime_type: Option<String>,
        /// Base64 payload length, the payload itself is not kept
        size: usize,
    },
}

impl ResourceContent {
    /// Text form used when attaching a resource to a query
    pub fn render(&self) -> String {
        match self {
            ResourceContent::Text { text, .. } => text.clone(),
            ResourceContent::Blob {
                uri,
                mime_type,
                size,
            } => format!(
                "[binary resource {uri} ({}, {size} base64 bytes)]",
                mime_type.as_deref().unwrap_or("application/octet-stream")
            ),
        }
    }
}

/// Live connection to a tool server
///
/// Every method is one request/response round-trip. Implementations never
/// retry.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Whether the handshake completed and the session is not closed
    fn is_ready(&self) -> bool;

    /// Whether concurrent requests are correlated independently.
    ///
    /// The engine only dispatches one round's tool calls concurrently when
    /// this is true and it was asked to.
    fn supports_multiplexing(&self) -> bool {
        false
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>>;

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>>;

    /// Invoke a tool; a tool-side failure comes back as `is_error` output
    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolOutput>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptPayload>;

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>>;
}

/// Read a resource and join its parts, one per line
pub async fn read_resource_text(session: &dyn ToolSession, uri: &str) -> Result<String> {
    let contents = session.read_resource(uri).await?;
    Ok(contents
        .iter()
        .map(ResourceContent::render)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string())
}
