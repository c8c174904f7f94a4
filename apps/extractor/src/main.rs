mod config;
mod document;
mod errors;
mod extraction;
mod llm_client;
mod models;
mod routes;
mod schema;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LlmProvider};
use crate::document::FileParser;
use crate::extraction::client::ExtractionClient;
use crate::extraction::jobs::BatchRegistry;
use crate::extraction::orchestrator::Orchestrator;
use crate::extraction::pipeline::Pipeline;
use crate::llm_client::{AnthropicProvider, OpenAiProvider, Provider};
use crate::routes::build_router;
use crate::schema::load_schema_file;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on a missing provider key)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting extractor v{}", env!("CARGO_PKG_VERSION"));

    let provider = build_provider(&config)?;
    let client = ExtractionClient::new(
        provider,
        config.retry_policy(),
        config.generation_settings(),
    );
    info!(
        "Extraction client initialized (max {} attempts, {} transport retries)",
        config.max_attempts, config.transport_retries
    );

    let orchestrator = Arc::new(Orchestrator::new(Arc::new(client)));
    let pipeline = Arc::new(Pipeline::new(Arc::new(FileParser), orchestrator));

    let default_schema = match &config.default_schema_path {
        Some(path) => {
            let schema = load_schema_file(path)?;
            info!(
                "Default schema loaded from {} (v{}, {} fields)",
                path.display(),
                schema.version,
                schema.variables.len()
            );
            Some(Arc::new(schema))
        }
        None => None,
    };

    let state = AppState {
        config: config.clone(),
        pipeline,
        batches: BatchRegistry::new(config.batch_retention()),
        default_schema,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs the provider selected by `LLM_PROVIDER`.
fn build_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let timeout = config.request_timeout();
    match config.provider {
        LlmProvider::Anthropic => {
            let key = config
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY is not set")?;
            let provider = AnthropicProvider::new(key, config.model.clone(), timeout)?;
            info!("LLM provider: anthropic (model: {})", provider.model());
            Ok(Arc::new(provider))
        }
        LlmProvider::OpenAi => {
            let key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY is not set")?;
            let provider = OpenAiProvider::new(
                key,
                config.openai_api_base.clone(),
                config.model.clone(),
                timeout,
            )?;
            info!("LLM provider: openai (model: {})", provider.model());
            Ok(Arc::new(provider))
        }
    }
}
