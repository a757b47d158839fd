//! In-memory doubles for the provider and tool-session traits.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{PromptDescriptor, ResourceDescriptor};
use crate::error::{AgentError, Result};
use crate::message::ContentBlock;
use crate::provider::{Completion, CompletionRequest, LlmProvider, ModelInfo};
use crate::session::{PromptPayload, ResourceContent, ToolSession};
use crate::tool::{ToolDescriptor, ToolOutput};

/// Ordered record of model and tool calls shared by the doubles
pub type Journal = Arc<Mutex<Vec<String>>>;

const METHOD_NOT_FOUND: i64 = -32601;

fn method_not_found(what: &str) -> AgentError {
    AgentError::Rpc {
        code: METHOD_NOT_FOUND,
        message: format!("{what} not supported"),
    }
}

/// How a fake tool answers
#[derive(Clone, Debug)]
pub enum ToolBehavior {
    Reply(ToolOutput),
    TransportFailure(String),
}

/// Scripted tool server
#[derive(Default)]
pub struct FakeSession {
    tools: Option<Vec<ToolDescriptor>>,
    prompts: Option<HashMap<String, PromptPayload>>,
    resources: Option<HashMap<String, Vec<ResourceContent>>>,
    behaviors: HashMap<String, ToolBehavior>,
    multiplexing: bool,
    calls: Mutex<Vec<(String, Value)>>,
    prompt_requests: Mutex<Vec<(String, HashMap<String, String>)>>,
    journal: Option<Journal>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            tools: Some(Vec::new()),
            prompts: Some(HashMap::new()),
            resources: Some(HashMap::new()),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.tools = None;
        self
    }

    pub fn without_prompts(mut self) -> Self {
        self.prompts = None;
        self
    }

    pub fn with_prompt(mut self, name: &str, payload: PromptPayload) -> Self {
        self.prompts
            .get_or_insert_with(HashMap::new)
            .insert(name.to_string(), payload);
        self
    }

    pub fn with_resource(mut self, uri: &str, contents: Vec<ResourceContent>) -> Self {
        self.resources
            .get_or_insert_with(HashMap::new)
            .insert(uri.to_string(), contents);
        self
    }

    pub fn replying(mut self, tool: &str, output: ToolOutput) -> Self {
        self.behaviors
            .insert(tool.to_string(), ToolBehavior::Reply(output));
        self
    }

    pub fn failing(mut self, tool: &str, message: &str) -> Self {
        self.behaviors.insert(
            tool.to_string(),
            ToolBehavior::TransportFailure(message.to_string()),
        );
        self
    }

    pub fn multiplexing(mut self) -> Self {
        self.multiplexing = true;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompt_requests(&self) -> Vec<(String, HashMap<String, String>)> {
        self.prompt_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    fn is_ready(&self) -> bool {
        true
    }

    fn supports_multiplexing(&self) -> bool {
        self.multiplexing
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.tools.clone().ok_or_else(|| method_not_found("tools/list"))
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>> {
        let prompts = self
            .prompts
            .as_ref()
            .ok_or_else(|| method_not_found("prompts/list"))?;
        let mut names: Vec<&String> = prompts.keys().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| PromptDescriptor {
                name: name.clone(),
                description: None,
                arguments: Vec::new(),
            })
            .collect())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| method_not_found("resources/list"))?;
        Ok(resources
            .keys()
            .map(|uri| ResourceDescriptor {
                uri: uri.clone(),
                name: uri.clone(),
                description: None,
                mime_type: None,
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("tool:{name}"));
        }

        match self.behaviors.get(name) {
            Some(ToolBehavior::Reply(output)) => Ok(output.clone()),
            Some(ToolBehavior::TransportFailure(message)) => {
                Err(AgentError::Transport(message.clone()))
            }
            None => Err(AgentError::Rpc {
                code: -32602,
                message: format!("Unknown tool: {name}"),
            }),
        }
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptPayload> {
        self.prompt_requests
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        self.prompts
            .as_ref()
            .and_then(|p| p.get(name).cloned())
            .ok_or_else(|| AgentError::Rpc {
                code: -32602,
                message: format!("Unknown prompt: {name}"),
            })
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>> {
        self.resources
            .as_ref()
            .and_then(|r| r.get(uri).cloned())
            .ok_or_else(|| AgentError::Rpc {
                code: -32002,
                message: format!("Resource not found: {uri}"),
            })
    }
}

/// What a scripted provider saw on one call
#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub message_count: usize,
    pub tool_names: Vec<String>,
    pub model: String,
}

/// Provider that replays canned responses in order
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<Completion>>>,
    seen: Mutex<Vec<SeenRequest>>,
    journal: Option<Journal>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<Completion>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Provider answering with the given block lists, in order
    pub fn blocks(rounds: Vec<Vec<ContentBlock>>) -> Self {
        Self::new(
            rounds
                .into_iter()
                .map(|content| {
                    Ok(Completion {
                        content,
                        model: "scripted".into(),
                        usage: None,
                        finish_reason: None,
                    })
                })
                .collect(),
        )
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        self.seen.lock().unwrap().push(SeenRequest {
            message_count: request.messages.len(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            model: request.options.model.clone(),
        });
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push("model".into());
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Provider("script exhausted".into())))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }
}

pub fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }
}
