use std::sync::Arc;

use crate::cancellation::InFlight;
use crate::kv_store::KeyValueStore;
use crate::llm_client::TextGenerator;
use crate::prompt_store::PromptStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Template source. Production: `PgPromptStore`.
    pub prompts: Arc<dyn PromptStore>,
    /// Text generation backend. Production: `LlmClient` against an OpenAI-compatible API.
    pub llm: Arc<dyn TextGenerator>,
    /// Per-session working state. Production: `RedisStore`.
    pub store: Arc<dyn KeyValueStore>,
    pub in_flight: Arc<InFlight>,
}
