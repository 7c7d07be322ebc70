//! Avatar conversation: one user message fans out to every avatar at once.
//!
//! Flow: load history → render system + per-avatar prompts → concurrent LLM
//! calls sharing one cancellation token → append user message and replies.
//!
//! The group is all-or-nothing: a failure or abort in any call drops the rest
//! and leaves the stored history untouched.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::kv_store::{save_json, session_key, MESSAGES_KEY};
use crate::llm_client::prompts::{with_fragment, CONVERSATIONAL_SYSTEM};
use crate::llm_client::{GenerationParams, GenerationRequest};
use crate::narrative::models::{Avatar, ConversationMessage};
use crate::narrative::{format_history, load_history, render_prompt, Deps};
use crate::prompt_store::PromptType;
use crate::templating::SubstitutionContext;

const REPLY_MAX_TOKENS: u32 = 400;
const REPLY_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone, Deserialize)]
pub struct RespondRequest {
    pub message: String,
    pub avatars: Vec<Avatar>,
    #[serde(default)]
    pub church_name: Option<String>,
    #[serde(default)]
    pub research_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RespondResponse {
    /// The user's message followed by one reply per avatar, in request order.
    pub messages: Vec<ConversationMessage>,
}

pub async fn respond(
    deps: &Deps<'_>,
    session_id: Uuid,
    request: RespondRequest,
    cancel: &CancellationToken,
) -> Result<RespondResponse, AppError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("message cannot be empty".to_string()));
    }
    let avatars = distinct_roles(request.avatars);
    if avatars.is_empty() {
        return Err(AppError::Validation(
            "at least one avatar is required".to_string(),
        ));
    }

    let history = load_history(deps.store, session_id).await;
    let base = SubstitutionContext::new()
        .with("user_message", message)
        .with("conversation_history", format_history(&history))
        .with("church_name", request.church_name.unwrap_or_default())
        .with("research_summary", request.research_summary.unwrap_or_default());

    let system = render_prompt(deps.prompts, PromptType::ConversationSystem, &base).await?;
    let system = with_fragment(&system, CONVERSATIONAL_SYSTEM);

    let group = cancel.child_token();
    let params = GenerationParams {
        max_tokens: REPLY_MAX_TOKENS,
        temperature: REPLY_TEMPERATURE,
    };

    let replies = try_join_all(avatars.iter().map(|avatar| {
        let context = base
            .clone()
            .with("avatar_name", avatar.name.as_str())
            .with("avatar_role", avatar.role.label())
            .with("avatar_description", avatar.description.as_str());
        let system = system.as_str();
        let group = &group;
        async move {
            let user_prompt = render_prompt(deps.prompts, avatar.role.prompt_type(), &context).await?;
            let request = GenerationRequest::prompt(system, user_prompt, params);
            let text = deps.llm.generate(&request, group).await?;
            Ok::<_, AppError>(ConversationMessage::from_avatar(avatar, text.trim()))
        }
    }))
    .await;

    let replies = match replies {
        Ok(replies) => replies,
        Err(e) => {
            group.cancel();
            return Err(e);
        }
    };

    if cancel.is_cancelled() {
        return Err(AppError::Aborted);
    }

    let mut messages = Vec::with_capacity(replies.len() + 1);
    messages.push(ConversationMessage::from_user(message));
    messages.extend(replies);

    let mut updated = history;
    updated.extend(messages.iter().cloned());
    save_json(deps.store, &session_key(session_id, MESSAGES_KEY), &updated).await;

    info!(
        "Session {session_id}: {} avatar replies appended ({} messages total)",
        messages.len() - 1,
        updated.len()
    );

    Ok(RespondResponse { messages })
}

/// Keeps the first avatar for each role, preserving order.
fn distinct_roles(avatars: Vec<Avatar>) -> Vec<Avatar> {
    let mut seen = Vec::new();
    avatars
        .into_iter()
        .filter(|a| {
            if seen.contains(&a.role) {
                false
            } else {
                seen.push(a.role);
                true
            }
        })
        .collect()
}
