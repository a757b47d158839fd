//! Prompt Template Resolver
//!
//! Renders a named server-side prompt template into plain text. The text is
//! then handed to the engine like any other user input.

use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::error::{AgentError, Result};
use crate::session::{PromptPayload, ToolSession};

/// Stateless resolver for prompt templates
#[derive(Clone, Copy, Debug, Default)]
pub struct PromptResolver;

impl PromptResolver {
    /// Fetch and render `name` with `arguments`.
    ///
    /// A JSON-RPC error from the server means the template is unknown.
    pub async fn resolve(
        session: &dyn ToolSession,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<String> {
        let payload = session
            .get_prompt(name, arguments)
            .await
            .map_err(|e| match e {
                AgentError::Rpc { code, message } => {
                    tracing::debug!(prompt = %name, code, %message, "Prompt lookup rejected");
                    AgentError::PromptNotFound(name.to_string())
                }
                other => other,
            })?;

        Ok(render(payload))
    }

    /// Like [`resolve`](Self::resolve), checking the catalog first
    pub async fn resolve_checked(
        session: &dyn ToolSession,
        catalog: &Catalog,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<String> {
        let descriptor = catalog
            .prompt(name)
            .ok_or_else(|| AgentError::PromptNotFound(name.to_string()))?;

        let missing = descriptor.missing_arguments(arguments);
        if !missing.is_empty() {
            return Err(AgentError::Config(format!(
                "prompt '{name}' is missing required arguments: {}",
                missing.join(", ")
            )));
        }

        Self::resolve(session, name, arguments).await
    }
}

/// Sub-messages are joined one per line
fn render(payload: PromptPayload) -> String {
    match payload {
        PromptPayload::Body(text) => text,
        PromptPayload::Messages(messages) => messages
            .into_iter()
            .map(|m| m.text)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
    }
}
