// Narrative discovery services.
// Each service: stored template + caller context → substitution → LLM →
// tolerant extraction (when structured) → session state update.
// All LLM calls go through the TextGenerator trait.

pub mod conversation;
pub mod generation;
pub mod handlers;
pub mod models;
pub mod scenarios;
pub mod vocational;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::extraction::Extraction;
use crate::kv_store::{load_json, session_key, KeyValueStore, MESSAGES_KEY};
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{generate_structured, GenerationParams, GenerationRequest, TextGenerator};
use crate::prompt_store::{PromptStore, PromptType};
use crate::state::AppState;
use crate::templating::{populate, unresolved, MissingPlaceholder, SubstitutionContext};

use models::{Avatar, ConversationMessage, Speaker};

/// How many recent messages are quoted into prompts.
const HISTORY_WINDOW: usize = 20;

/// Collaborators shared by every narrative service.
#[derive(Clone, Copy)]
pub struct Deps<'a> {
    pub prompts: &'a dyn PromptStore,
    pub llm: &'a dyn TextGenerator,
    pub store: &'a dyn KeyValueStore,
}

impl<'a> Deps<'a> {
    pub fn from_state(state: &'a AppState) -> Self {
        Self {
            prompts: state.prompts.as_ref(),
            llm: state.llm.as_ref(),
            store: state.store.as_ref(),
        }
    }
}

/// Fetches a template and fills it. Unknown placeholders become empty strings.
pub(crate) async fn render_prompt(
    prompts: &dyn PromptStore,
    prompt_type: PromptType,
    context: &SubstitutionContext,
) -> Result<String, AppError> {
    let template = prompts.fetch(prompt_type.as_str()).await?;
    let missing = unresolved(&template.body, context);
    if !missing.is_empty() {
        debug!("Template '{prompt_type}' has no values for: {}", missing.join(", "));
    }
    Ok(populate(&template.body, context, MissingPlaceholder::Empty))
}

/// Renders a template, asks for JSON, and interprets the reply.
pub(crate) async fn generate_extraction(
    deps: &Deps<'_>,
    prompt_type: PromptType,
    context: &SubstitutionContext,
    params: GenerationParams,
    cancel: &CancellationToken,
) -> Result<Extraction, AppError> {
    let user_prompt = render_prompt(deps.prompts, prompt_type, context).await?;
    let request = GenerationRequest::prompt(JSON_ONLY_SYSTEM, user_prompt, params);
    let extraction = generate_structured(deps.llm, &request, cancel).await?;
    // A reply that lands after cancellation is discarded, never cached.
    if cancel.is_cancelled() {
        return Err(AppError::Aborted);
    }
    if extraction.is_fallback() {
        debug!("Reply for '{prompt_type}' kept as plain text");
    }
    Ok(extraction)
}

pub(crate) async fn load_history(store: &dyn KeyValueStore, session_id: Uuid) -> Vec<ConversationMessage> {
    load_json(store, &session_key(session_id, MESSAGES_KEY))
        .await
        .unwrap_or_default()
}

/// Renders the tail of a conversation as `Speaker: text` lines.
pub(crate) fn format_history(messages: &[ConversationMessage]) -> String {
    let start = messages.len().saturating_sub(HISTORY_WINDOW);
    messages[start..]
        .iter()
        .map(|m| {
            let who = match (&m.speaker, &m.name) {
                (Speaker::User, _) => "User".to_string(),
                (_, Some(name)) => name.clone(),
                (speaker, None) => format!("{speaker:?}"),
            };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per avatar: `Name (role): description`.
pub(crate) fn describe_avatars(avatars: &[Avatar]) -> String {
    avatars
        .iter()
        .map(|a| {
            if a.description.trim().is_empty() {
                format!("{} ({})", a.name, a.role.label())
            } else {
                format!("{} ({}): {}", a.name, a.role.label(), a.description.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
