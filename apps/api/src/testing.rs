//! Fakes shared by unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cancellation::InFlight;
use crate::kv_store::MemoryStore;
use crate::llm_client::{AbortReason, GenerationRequest, LlmError, TextGenerator};
use crate::prompt_store::{MemoryPromptStore, PromptType};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    RateLimited,
    Failure,
    Empty,
    /// Blocks until the token is cancelled.
    Hang,
    /// Cancels the token, then answers anyway (a reply racing a cancel).
    CancelThen(String),
}

/// Answers each request with the reply of the first rule whose marker appears
/// in the last message.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Vec<(String, Reply)>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, marker: &str, reply: Reply) -> Self {
        self.rules.push((marker.to_string(), reply));
        self
    }

    pub fn reply(self, marker: &str, text: &str) -> Self {
        self.on(marker, Reply::Text(text.to_string()))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Aborted(AbortReason::Cancelled));
        }
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let reply = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::RateLimited) => Err(LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            }),
            Some(Reply::Empty) => Err(LlmError::EmptyResponse),
            Some(Reply::CancelThen(text)) => {
                cancel.cancel();
                Ok(text)
            }
            Some(Reply::Hang) => {
                cancel.cancelled().await;
                Err(LlmError::Aborted(AbortReason::Cancelled))
            }
            Some(Reply::Failure) | None => Err(LlmError::Api {
                status: 500,
                message: format!("no scripted reply for: {prompt}"),
            }),
        }
    }
}

/// Templates whose first line is a marker the scripted generator can key on.
pub fn seeded_prompts() -> MemoryPromptStore {
    MemoryPromptStore::new()
        .with(
            PromptType::ConversationSystem,
            "You are part of a discovery conversation for $(church_name).",
        )
        .with(
            PromptType::AvatarChurch,
            "[church] You are $(avatar_name), $(avatar_description).\nHistory:\n$(conversation_history)\nUser says: $(user_message)",
        )
        .with(
            PromptType::AvatarCommunity,
            "[community] You are $(avatar_name), $(avatar_description).\nHistory:\n$(conversation_history)\nUser says: $(user_message)",
        )
        .with(
            PromptType::CompanionResponse,
            "[companion] You are $(avatar_name), $(avatar_description).\nHistory:\n$(conversation_history)\nUser says: $(user_message)",
        )
        .with(
            PromptType::NarrativeGeneration,
            "[narratives] Avatars:\n$(avatars)\nResearch: $(research_summary)\nConversation:\n$(conversation_history)\nWrite {narrative_count} narratives as {\"narratives\": [{\"title\": \"\", \"content\": \"\"}]}",
        )
        .with(
            PromptType::VocationalStatement,
            "[vocational] Church: $(church_name)\nNarratives:\n$(narratives)\nResearch: $(research_summary)",
        )
        .with(
            PromptType::ScenarioRefinement,
            "[refine] Scenarios:\n$(scenarios)\nVocation: $(vocational_statement)\nGuidance: $(guidance)",
        )
}

pub fn test_state(generator: Arc<ScriptedGenerator>) -> AppState {
    AppState {
        prompts: Arc::new(seeded_prompts()),
        llm: generator,
        store: Arc::new(MemoryStore::new()),
        in_flight: Arc::new(InFlight::new()),
    }
}
