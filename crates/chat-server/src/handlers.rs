//! HTTP Handlers
//!
//! Every request that touches the tool server opens its own session and
//! closes it before responding. Conversation history travels with the
//! request and response; the server keeps none.

use std::collections::HashMap;
use std::future::Future;

use tokio::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use chat_core::{
    catalog::{Catalog, Category, ToolSelection},
    context::AttachedContext,
    engine::{ConversationEngine, TurnOutcome},
    error::{AgentError, Result},
    message::Conversation,
    prompt::PromptResolver,
    session::read_resource_text,
};
use chat_runtime::{with_session, StdioSession};

use crate::config::ServerConfig;
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
}

/// `"all"`, `"none"`, or a list of tool names
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EnabledTools {
    Keyword(String),
    Names(Vec<String>),
}

impl Default for EnabledTools {
    fn default() -> Self {
        EnabledTools::Keyword("all".into())
    }
}

impl TryFrom<EnabledTools> for ToolSelection {
    type Error = AgentError;

    fn try_from(value: EnabledTools) -> Result<Self> {
        match value {
            EnabledTools::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(ToolSelection::All),
            EnabledTools::Keyword(k) if k.eq_ignore_ascii_case("none") => Ok(ToolSelection::None),
            EnabledTools::Keyword(k) => Err(AgentError::Config(format!(
                "enabled_tools must be \"all\", \"none\" or a list of names, got \"{k}\""
            ))),
            EnabledTools::Names(names) => Ok(ToolSelection::named(names)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Conversation,
    #[serde(default)]
    pub enabled_tools: EnabledTools,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachedContext>,
    #[serde(default)]
    pub resource_uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub history: Conversation,
    pub rounds: usize,
    pub tool_calls: usize,
    /// Text the model wrote alongside its tool requests
    pub narration: Vec<String>,
    pub model: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub arguments: HashMap<String, String>,
    #[serde(default)]
    pub history: Conversation,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    /// Rendered template text, as submitted to the model
    pub prompt: String,
    pub message: String,
    pub history: Conversation,
}

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    pub uri: String,
}

#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub uri: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============================================================================
// Error Mapping
// ============================================================================

fn error_response(e: &AgentError) -> ApiError {
    let (status, code) = match e {
        AgentError::Connection(_) => (StatusCode::BAD_GATEWAY, "TOOL_SERVER_UNAVAILABLE"),
        AgentError::Transport(_) | AgentError::Rpc { .. } => {
            (StatusCode::BAD_GATEWAY, "TOOL_SERVER_ERROR")
        }
        AgentError::PromptNotFound(_) => (StatusCode::NOT_FOUND, "PROMPT_NOT_FOUND"),
        AgentError::Config(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        AgentError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TURN_TIMEOUT"),
        AgentError::RoundLimit(_) => (StatusCode::GATEWAY_TIMEOUT, "ROUND_LIMIT"),
        AgentError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        AgentError::ProviderUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
        }
        AgentError::Auth(_) | AgentError::Provider(_) | AgentError::Protocol(_) => {
            (StatusCode::BAD_GATEWAY, "AGENT_ERROR")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    (
        status,
        Json(ErrorResponse {
            error: e.user_message(),
            code: code.into(),
        }),
    )
}

fn reject(context: &str, e: &AgentError) -> ApiError {
    tracing::error!("{} failed: {}", context, e);
    error_response(e)
}

/// Wall-clock budget shared by everything one request does
struct Deadline {
    at: Instant,
    secs: u64,
}

impl Deadline {
    fn start(config: &ServerConfig) -> Self {
        Self {
            at: Instant::now() + config.turn_timeout,
            secs: config.turn_timeout.as_secs(),
        }
    }

    async fn run<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout_at(self.at, work)
            .await
            .unwrap_or_else(|_| Err(AgentError::Timeout(self.secs)))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.name().to_string(),
        provider_connected,
    })
}

/// Tools, prompts and resources the tool server exposes
pub async fn capabilities(
    State(state): State<AppState>,
) -> std::result::Result<Json<Catalog>, ApiError> {
    let catalog = with_session(&state.tool_server, |session| {
        Box::pin(async move { Ok(Catalog::fetch(session).await) })
    })
    .await
    .map_err(|e| reject("Capability listing", &e))?;

    Ok(Json(catalog))
}

/// Read one resource as text
pub async fn read_resource(
    State(state): State<AppState>,
    Query(query): Query<ResourceQuery>,
) -> std::result::Result<Json<ResourceResponse>, ApiError> {
    let uri = query.uri.clone();
    let text = with_session(&state.tool_server, move |session| {
        Box::pin(async move { read_resource_text(session, &uri).await })
    })
    .await
    .map_err(|e| reject("Resource read", &e))?;

    Ok(Json(ResourceResponse {
        uri: query.uri,
        text,
    }))
}

/// Main chat endpoint: one turn of the tool-calling loop
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> std::result::Result<Json<ChatResponse>, ApiError> {
    let ChatRequest {
        message,
        mut history,
        enabled_tools,
        model,
        attachments,
        resource_uri,
    } = payload;
    let selection = ToolSelection::try_from(enabled_tools).map_err(|e| error_response(&e))?;
    let model = state.model_or_default(model);
    let engine = state.engine(&model);

    tracing::info!(%model, history = history.len(), "Chat turn");

    let deadline = Deadline::start(&state.config);
    let session = deadline
        .run(StdioSession::open(&state.tool_server))
        .await
        .map_err(|e| reject("Chat turn", &e))?;

    let turn = ChatTurn {
        message,
        selection: &selection,
        attachments: &attachments,
        resource_uri: resource_uri.as_deref(),
    };
    let result = deadline
        .run(turn.run(&session, &state, &engine, &mut history))
        .await;
    session.close().await;

    let outcome = result.map_err(|e| reject("Chat turn", &e))?;

    Ok(Json(ChatResponse {
        message: outcome.text,
        history,
        rounds: outcome.rounds,
        tool_calls: outcome.tool_calls,
        narration: outcome.narration,
        model,
    }))
}

/// Inputs of one chat turn besides history
struct ChatTurn<'a> {
    message: String,
    selection: &'a ToolSelection,
    attachments: &'a [AttachedContext],
    resource_uri: Option<&'a str>,
}

impl ChatTurn<'_> {
    async fn run(
        self,
        session: &StdioSession,
        state: &AppState,
        engine: &ConversationEngine,
        history: &mut Conversation,
    ) -> Result<TurnOutcome> {
        let catalog = Catalog::fetch(session).await;
        let tools = catalog.enabled_tools(self.selection);

        let resource = match self.resource_uri {
            Some(uri) => {
                let body = read_resource_text(session, uri).await?;
                let label = catalog
                    .resource(uri)
                    .map_or_else(|| uri.to_string(), |r| r.name.clone());
                Some(AttachedContext::new(label, body))
            }
            None => None,
        };

        let outbound = state
            .assembler
            .assemble(&self.message, self.attachments, resource.as_ref());
        engine
            .run_turn_with_context(history, self.message, outbound, &tools, session)
            .await
    }
}

/// Resolve a prompt template and run it as a turn with no tools
pub async fn prompt_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Option<Json<PromptRequest>>,
) -> std::result::Result<Json<PromptResponse>, ApiError> {
    let PromptRequest {
        arguments,
        mut history,
        model,
    } = payload.map(|Json(p)| p).unwrap_or_default();
    let model = state.model_or_default(model);
    let engine = state.engine(&model);

    tracing::info!(prompt = %name, %model, "Prompt turn");

    let deadline = Deadline::start(&state.config);
    let session = deadline
        .run(StdioSession::open(&state.tool_server))
        .await
        .map_err(|e| reject("Prompt turn", &e))?;

    let result = deadline
        .run(prompt_turn(&session, &engine, &name, &arguments, &mut history))
        .await;
    session.close().await;

    let (prompt, outcome) = result.map_err(|e| reject("Prompt turn", &e))?;

    Ok(Json(PromptResponse {
        prompt,
        message: outcome.text,
        history,
    }))
}

async fn prompt_turn(
    session: &StdioSession,
    engine: &ConversationEngine,
    name: &str,
    arguments: &HashMap<String, String>,
    history: &mut Conversation,
) -> Result<(String, TurnOutcome)> {
    let catalog = Catalog::fetch(session).await;
    let prompt = if catalog.unavailable.contains(&Category::Prompts) {
        PromptResolver::resolve(session, name, arguments).await?
    } else {
        PromptResolver::resolve_checked(session, &catalog, name, arguments).await?
    };

    let outcome = engine.run_turn(history, prompt.clone(), &[], session).await?;
    Ok((prompt, outcome))
}
