//! Tool-calling chat HTTP server
//!
//! Axum-based server in front of the conversation engine. Each request
//! that needs tools launches the configured tool server, runs one turn and
//! shuts the tool server down again.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_core::LlmProvider;
use chat_runtime::{AnthropicProvider, OllamaProvider, ServerCommand};

use crate::config::{ProviderKind, ServerConfig};
use crate::handlers::{capabilities, chat_handler, health_check, prompt_handler, read_resource};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    let tool_server = ServerCommand::from_env();

    // Initialize LLM provider
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_env()?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_env()?),
    };

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to {}", provider.name());
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} not reachable - turns will fail", provider.name());
        }
    }

    tracing::info!("LLM provider: {}", config.provider);
    tracing::info!("Tool server command: {}", tool_server);
    tracing::info!("Default model: {}", config.default_model);
    match config.max_tool_rounds {
        Some(max) => tracing::info!("Turn limits: {}s, {} model calls", config.turn_timeout.as_secs(), max),
        None => tracing::info!("Turn limits: {}s", config.turn_timeout.as_secs()),
    }

    let addr = config.bind_addr.clone();
    let app = router(AppState::new(provider, tool_server, config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 chat server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health               - Health check");
    tracing::info!("  GET  /api/capabilities     - Tools, prompts and resources");
    tracing::info!("  GET  /api/resource?uri=    - Read a resource");
    tracing::info!("  POST /api/chat             - Run one turn");
    tracing::info!("  POST /api/prompts/{{name}}   - Run a prompt template");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/capabilities", get(capabilities))
        .route("/api/resource", get(read_resource))
        // Conversation
        .route("/api/chat", post(chat_handler))
        .route("/api/prompts/{name}", post(prompt_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
