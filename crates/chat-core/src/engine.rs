//! Conversation Engine
//!
//! Drives one turn of the tool-calling protocol: ask the model, run the
//! tools it requests through the session, feed the results back, repeat
//! until the model answers with text alone.
//!
//! ```text
//!   AwaitingModel ──text──▶ ModelRespondedText (done)
//!        ▲
//!        │            tool requests
//!        │   ┌──────────────────────────┐
//!        │   ▼                          │
//!   AwaitingToolResults ◀── ModelRespondedWithTools
//! ```
//!
//! The engine imposes no round limit of its own. Callers bound a turn with
//! [`EngineConfig::max_rounds`] or an outer deadline.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::message::{ContentBlock, Conversation, Message};
use crate::provider::{CompletionRequest, GenerationOptions, LlmProvider};
use crate::session::ToolSession;
use crate::tool::{ToolDescriptor, ToolInvocation, ToolResult};

/// Engine configuration
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Generation options sent with every model call
    pub generation: GenerationOptions,

    /// Caller-imposed ceiling on model calls per turn
    pub max_rounds: Option<usize>,

    /// Dispatch one round's tool calls concurrently when the session
    /// multiplexes requests
    pub parallel_tool_calls: bool,
}

/// What a finished turn produced
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Final answer
    pub text: String,

    /// Model calls made
    pub rounds: usize,

    /// Tool results folded into history
    pub tool_calls: usize,

    /// Text the model emitted next to tool requests in earlier rounds
    pub narration: Vec<String>,
}

enum TurnState {
    AwaitingModel,
    ModelRespondedWithTools(Vec<ToolInvocation>),
    AwaitingToolResults(Vec<ToolResult>),
    ModelRespondedText(String),
}

/// Runs turns against one provider
pub struct ConversationEngine {
    provider: Arc<dyn LlmProvider>,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    /// Run one turn.
    ///
    /// `input` is appended to `history` as a user message, then the loop
    /// runs until the model answers with text. History is only ever
    /// appended to; on error everything appended so far stays.
    pub async fn run_turn(
        &self,
        history: &mut Conversation,
        input: impl Into<String>,
        tools: &[ToolDescriptor],
        session: &dyn ToolSession,
    ) -> Result<TurnOutcome> {
        history.push(Message::user(input));
        self.drive(history, tools, session).await
    }

    /// Run one turn where the model sees `outbound` in place of `input`.
    ///
    /// `outbound` is the input merged with attached context. It is sent on
    /// every round of this turn, while `history` records only `input`; all
    /// later messages of the turn are appended to both.
    pub async fn run_turn_with_context(
        &self,
        history: &mut Conversation,
        input: impl Into<String>,
        outbound: impl Into<String>,
        tools: &[ToolDescriptor],
        session: &dyn ToolSession,
    ) -> Result<TurnOutcome> {
        let mut wire = history.clone();
        wire.push(Message::user(outbound));
        history.push(Message::user(input));

        let result = self.drive(&mut wire, tools, session).await;

        let seen = history.len();
        for message in wire.into_messages().into_iter().skip(seen) {
            history.push(message);
        }
        result
    }

    /// The turn loop; the new input is already the last message
    async fn drive(
        &self,
        history: &mut Conversation,
        tools: &[ToolDescriptor],
        session: &dyn ToolSession,
    ) -> Result<TurnOutcome> {
        let mut outcome = TurnOutcome::default();
        let mut seen_ids = HashSet::new();
        let mut state = TurnState::AwaitingModel;

        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if let Some(limit) = self.config.max_rounds {
                        if outcome.rounds >= limit {
                            warn!(limit, "Turn exceeded round limit");
                            return Err(AgentError::RoundLimit(limit));
                        }
                    }
                    outcome.rounds += 1;

                    let request =
                        CompletionRequest::new(history.messages(), tools, &self.config.generation);
                    let completion = self.provider.complete(request).await?;
                    debug!(
                        provider = self.provider.name(),
                        round = outcome.rounds,
                        blocks = completion.content.len(),
                        "Model responded"
                    );

                    Self::classify(history, completion.content, &mut seen_ids, &mut outcome)?
                }
                TurnState::ModelRespondedWithTools(calls) => {
                    TurnState::AwaitingToolResults(self.dispatch(session, tools, &calls).await)
                }
                TurnState::AwaitingToolResults(results) => {
                    outcome.tool_calls += results.len();
                    history.push(Message::tool_results(results));
                    TurnState::AwaitingModel
                }
                TurnState::ModelRespondedText(text) => {
                    info!(
                        rounds = outcome.rounds,
                        tool_calls = outcome.tool_calls,
                        "Turn complete"
                    );
                    outcome.text = text;
                    return Ok(outcome);
                }
            };
        }
    }

    /// Append the response to history and pick the next state
    fn classify(
        history: &mut Conversation,
        content: Vec<ContentBlock>,
        seen_ids: &mut HashSet<String>,
        outcome: &mut TurnOutcome,
    ) -> Result<TurnState> {
        if content.is_empty() {
            return Err(AgentError::Protocol("model returned no content blocks".into()));
        }
        if content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
        {
            return Err(AgentError::Protocol(
                "model response contained a tool result block".into(),
            ));
        }

        if !content.iter().any(ContentBlock::is_tool_use) {
            let text = content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<String>();
            if content.len() == 1 {
                history.push(Message::assistant(text.clone()));
            } else {
                history.push(Message::assistant_blocks(content));
            }
            return Ok(TurnState::ModelRespondedText(text));
        }

        let mut calls = Vec::new();
        for block in &content {
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    if id.is_empty() || !seen_ids.insert(id.clone()) {
                        return Err(AgentError::Protocol(format!(
                            "tool request for '{name}' has a missing or repeated id '{id}'"
                        )));
                    }
                    calls.push(ToolInvocation {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    });
                }
                ContentBlock::Text { text } if !text.trim().is_empty() => {
                    outcome.narration.push(text.clone());
                }
                _ => {}
            }
        }

        history.push(Message::assistant_blocks(content));
        Ok(TurnState::ModelRespondedWithTools(calls))
    }

    /// One result per call, in call order
    async fn dispatch(
        &self,
        session: &dyn ToolSession,
        offered: &[ToolDescriptor],
        calls: &[ToolInvocation],
    ) -> Vec<ToolResult> {
        if self.config.parallel_tool_calls && calls.len() > 1 && session.supports_multiplexing() {
            debug!(count = calls.len(), "Dispatching tool calls concurrently");
            return join_all(calls.iter().map(|call| Self::invoke(session, offered, call))).await;
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(Self::invoke(session, offered, call).await);
        }
        results
    }

    /// Never fails: errors become error-bearing results for the model
    async fn invoke(
        session: &dyn ToolSession,
        offered: &[ToolDescriptor],
        call: &ToolInvocation,
    ) -> ToolResult {
        if !offered.iter().any(|t| t.name == call.name) {
            warn!(tool = %call.name, id = %call.id, "Model requested a tool that was not offered");
            return ToolResult::failure(
                &call.id,
                &call.name,
                format!("Error: tool '{}' is not enabled", call.name),
            );
        }

        debug!(tool = %call.name, id = %call.id, "Executing tool");
        match session.call_tool(&call.name, call.arguments.clone()).await {
            Ok(output) => {
                if output.is_error {
                    warn!(tool = %call.name, id = %call.id, "Tool reported an error");
                }
                ToolResult::from_output(call, output)
            }
            Err(e) => {
                let error = AgentError::tool(&call.name, e.to_string());
                warn!(id = %call.id, "{}", error);
                ToolResult::failure(&call.id, &call.name, format!("Error: {e}"))
            }
        }
    }

    /// Get configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Builder for engine configuration
pub struct EngineBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: EngineConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.generation.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.config.generation.max_tokens = max;
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = Some(temp);
        self
    }

    pub fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = Some(max);
        self
    }

    pub fn parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.config.parallel_tool_calls = enabled;
        self
    }

    pub fn build(self) -> Result<ConversationEngine> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        Ok(ConversationEngine::new(provider, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageContent, Role};
    use crate::provider::Completion;
    use crate::testing::{tool_use, FakeSession, Journal, ScriptedProvider};
    use crate::tool::ToolOutput;
    use serde_json::json;
    use std::sync::Mutex;

    fn search_tool() -> ToolDescriptor {
        ToolDescriptor::new(
            "search",
            "Search the web",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )
    }

    fn engine(provider: Arc<ScriptedProvider>) -> ConversationEngine {
        EngineBuilder::new().provider(provider).build().unwrap()
    }

    #[tokio::test]
    async fn single_text_block_ends_turn_after_one_call() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![vec![ContentBlock::text("4")]]));
        let session = FakeSession::new();
        let mut history = Conversation::from(vec![Message::user("Hi"), Message::assistant("Hello!")]);

        let outcome = engine(provider.clone())
            .run_turn(&mut history, "What is 2+2?", &[], &session)
            .await
            .unwrap();

        assert_eq!(outcome.text, "4");
        assert_eq!(outcome.rounds, 1);
        assert_eq!(provider.seen().len(), 1);
        assert_eq!(history.len(), 4);
        assert_eq!(history.messages()[2].role, Role::User);
        assert_eq!(history.messages()[2].text(), "What is 2+2?");
        assert_eq!(history.messages()[3].role, Role::Assistant);
        assert_eq!(history.messages()[3].text(), "4");
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn model_sees_full_history_and_offered_tools() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![vec![ContentBlock::text("ok")]]));
        let session = FakeSession::new();
        let mut history = Conversation::from(vec![Message::user("a"), Message::assistant("b")]);
        let engine = EngineBuilder::new()
            .provider(provider.clone())
            .model("claude-3-7-sonnet-20250219")
            .build()
            .unwrap();

        engine
            .run_turn(&mut history, "c", &[search_tool()], &session)
            .await
            .unwrap();

        let seen = provider.seen();
        assert_eq!(seen[0].message_count, 3);
        assert_eq!(seen[0].tool_names, vec!["search"]);
        assert_eq!(seen[0].model, "claude-3-7-sonnet-20250219");
    }

    #[tokio::test]
    async fn every_request_in_a_round_runs_before_next_model_call() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let provider = Arc::new(
            ScriptedProvider::blocks(vec![
                vec![
                    ContentBlock::text("Checking both."),
                    tool_use("t1", "search", json!({"query": "rust"})),
                    tool_use("t2", "search", json!({"query": "tokio"})),
                    tool_use("t3", "sum", json!({"a": 1, "b": 2})),
                ],
                vec![ContentBlock::text("Done.")],
            ])
            .with_journal(journal.clone()),
        );
        let sum = ToolDescriptor::new("sum", "Add", json!({"type": "object"}));
        let session = FakeSession::new()
            .replying("search", ToolOutput::text("hit"))
            .replying("sum", ToolOutput::text("3"))
            .with_journal(journal.clone());
        let mut history = Conversation::new();

        let outcome = engine(provider)
            .run_turn(&mut history, "go", &[search_tool(), sum], &session)
            .await
            .unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["model", "tool:search", "tool:search", "tool:sum", "model"]
        );
        assert_eq!(outcome.tool_calls, 3);
        assert_eq!(outcome.narration, vec!["Checking both."]);

        // user, assistant(tool requests), user(results), assistant(final)
        assert_eq!(history.len(), 4);
        let requests = &history.messages()[1];
        let results = &history.messages()[2];
        assert_eq!(requests.role, Role::Assistant);
        assert_eq!(requests.blocks().unwrap().len(), 4);
        assert_eq!(results.role, Role::User);
        assert_eq!(results.blocks().unwrap().len(), 3);

        let request_ids: Vec<&str> = requests.tool_uses().map(|(id, _, _)| id).collect();
        let result_ids: Vec<&str> = results.tool_result_ids().collect();
        assert_eq!(request_ids, result_ids);
    }

    #[tokio::test]
    async fn failed_tool_call_is_fed_back_not_fatal() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![tool_use("toolu_1", "search", json!({"query": "x"}))],
            vec![ContentBlock::text(
                "I couldn't search, but here's what I know: ...",
            )],
        ]));
        let session = FakeSession::new().failing("search", "broken pipe");
        let mut history = Conversation::new();

        let outcome = engine(provider.clone())
            .run_turn(&mut history, "find x", &[search_tool()], &session)
            .await
            .unwrap();

        assert_eq!(outcome.text, "I couldn't search, but here's what I know: ...");
        assert_eq!(provider.seen().len(), 2);
        assert_eq!(history.len(), 4);

        let failed = history.messages()[2].blocks().unwrap();
        assert_eq!(
            failed,
            &[ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "Error: Transport error: broken pipe".into(),
                is_error: true,
            }]
        );
        assert_eq!(history.messages()[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_side_error_keeps_server_payload() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![tool_use("a", "search", json!({}))],
            vec![ContentBlock::text("sorry")],
        ]));
        let mut output = ToolOutput::text("quota exceeded");
        output.is_error = true;
        let session = FakeSession::new().replying("search", output);
        let mut history = Conversation::new();

        engine(provider)
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap();

        match &history.messages()[2].blocks().unwrap()[0] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert_eq!(content, "quota exceeded");
                assert!(is_error);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_not_offered_is_answered_without_dispatch() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![tool_use("a", "delete_everything", json!({}))],
            vec![ContentBlock::text("ok")],
        ]));
        let session = FakeSession::new();
        let mut history = Conversation::new();

        engine(provider)
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap();

        assert!(session.calls().is_empty());
        match &history.messages()[2].blocks().unwrap()[0] {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "a");
                assert!(is_error);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_response_is_protocol_error_and_history_is_kept() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![tool_use("a", "search", json!({"query": "x"}))],
            vec![],
        ]));
        let session = FakeSession::new().replying("search", ToolOutput::text("hit"));
        let mut history = Conversation::new();

        let err = engine(provider)
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Protocol(_)));
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().unwrap().tool_result_ids().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn provider_failure_aborts_turn_with_user_message_kept() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(AgentError::ProviderUnavailable(
            "503".into(),
        ))]));
        let session = FakeSession::new();
        let mut history = Conversation::new();

        let err = engine(provider)
            .run_turn(&mut history, "q", &[], &session)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn text_after_tool_request_still_forces_another_round() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![
                tool_use("a", "search", json!({"query": "x"})),
                ContentBlock::text("Here is a partial answer"),
            ],
            vec![ContentBlock::text("final")],
        ]));
        let session = FakeSession::new().replying("search", ToolOutput::text("hit"));
        let mut history = Conversation::new();

        let outcome = engine(provider.clone())
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap();

        assert_eq!(outcome.text, "final");
        assert_eq!(provider.seen().len(), 2);
        assert_eq!(outcome.narration, vec!["Here is a partial answer"]);
    }

    #[tokio::test]
    async fn several_text_blocks_end_the_turn_joined() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![vec![
            ContentBlock::text("Hello, "),
            ContentBlock::text("world"),
        ]]));
        let session = FakeSession::new();
        let mut history = Conversation::new();

        let outcome = engine(provider)
            .run_turn(&mut history, "q", &[], &session)
            .await
            .unwrap();

        assert_eq!(outcome.text, "Hello, world");
        assert!(matches!(
            history.last().unwrap().content,
            MessageContent::Blocks(ref b) if b.len() == 2
        ));
    }

    #[tokio::test]
    async fn caller_round_limit_is_enforced() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![tool_use("a", "search", json!({}))],
            vec![tool_use("b", "search", json!({}))],
            vec![ContentBlock::text("never reached")],
        ]));
        let session = FakeSession::new().replying("search", ToolOutput::text("hit"));
        let engine = EngineBuilder::new()
            .provider(provider.clone())
            .max_rounds(2)
            .build()
            .unwrap();
        let mut history = Conversation::new();

        let err = engine
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::RoundLimit(2)));
        assert_eq!(provider.seen().len(), 2);
        // every request still has its result
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn repeated_request_id_is_protocol_error() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![vec![
            tool_use("same", "search", json!({})),
            tool_use("same", "search", json!({})),
        ]]));
        let session = FakeSession::new().replying("search", ToolOutput::text("hit"));
        let mut history = Conversation::new();

        let err = engine(provider)
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Protocol(_)));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_dispatch_preserves_order() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![
                tool_use("1", "search", json!({"query": "a"})),
                tool_use("2", "search", json!({"query": "b"})),
            ],
            vec![ContentBlock::text("done")],
        ]));
        let session = FakeSession::new()
            .replying("search", ToolOutput::text("hit"))
            .multiplexing();
        let engine = EngineBuilder::new()
            .provider(provider)
            .parallel_tool_calls(true)
            .build()
            .unwrap();
        let mut history = Conversation::new();

        engine
            .run_turn(&mut history, "q", &[search_tool()], &session)
            .await
            .unwrap();

        assert_eq!(session.calls().len(), 2);
        assert_eq!(
            history.messages()[2].tool_result_ids().collect::<Vec<_>>(),
            vec!["1", "2"]
        );
    }

    #[tokio::test]
    async fn attached_context_reaches_model_but_not_history() {
        let provider = Arc::new(ScriptedProvider::blocks(vec![
            vec![tool_use("a", "search", json!({"query": "x"}))],
            vec![ContentBlock::text("answer")],
        ]));
        let session = FakeSession::new().replying("search", ToolOutput::text("hit"));
        let mut history = Conversation::from(vec![Message::user("hi"), Message::assistant("hello")]);

        let outcome = engine(provider.clone())
            .run_turn_with_context(
                &mut history,
                "question",
                "=== DOCUMENT CONTEXT ===\n...\n\n=== USER QUESTION ===\nquestion",
                &[search_tool()],
                &session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "answer");
        assert_eq!(provider.seen().iter().map(|s| s.message_count).collect::<Vec<_>>(), vec![3, 5]);
        assert_eq!(history.len(), 6);
        assert_eq!(history.messages()[2].text(), "question");
        assert_eq!(history.messages()[3].tool_uses().count(), 1);
        assert_eq!(history.messages()[5].text(), "answer");
    }

    #[test]
    fn builder_requires_provider() {
        assert!(matches!(
            EngineBuilder::new().build(),
            Err(AgentError::Config(_))
        ));
    }
}
