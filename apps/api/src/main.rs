mod cancellation;
mod config;
mod db;
mod errors;
mod extraction;
mod kv_store;
mod llm_client;
mod narrative;
mod prompt_store;
mod routes;
mod state;
mod templating;
#[cfg(test)]
mod testing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cancellation::InFlight;
use crate::config::Config;
use crate::db::create_pool;
use crate::kv_store::RedisStore;
use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::{LlmClient, LlmSettings};
use crate::prompt_store::PgPromptStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Narrative API v{}", env!("CARGO_PKG_VERSION"));

    // Prompt templates live in PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let prompts = Arc::new(PgPromptStore::new(db));

    // Session state lives in Redis
    let store = Arc::new(RedisStore::connect(&config.redis_url).await?);

    // Initialize LLM client
    let llm = LlmClient::new(LlmSettings {
        api_key: config.openai_api_key.clone(),
        base_url: config.openai_base_url.clone(),
        model: config.openai_model.clone(),
        timeout: config.llm_timeout,
        retry: RetryPolicy::default().with_max_attempts(config.llm_max_attempts),
    })?;
    info!(
        "LLM client initialized (model: {}, timeout: {:?}, attempts: {})",
        llm.model(),
        config.llm_timeout,
        config.llm_max_attempts
    );

    let state = AppState {
        prompts,
        llm: Arc::new(llm),
        store,
        in_flight: Arc::new(InFlight::new()),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
