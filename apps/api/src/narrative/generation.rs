//! Narrative generation: turns the discovery conversation into candidate
//! ministry narratives.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::kv_store::{save_json, session_key, NARRATIVES_KEY};
use crate::llm_client::GenerationParams;
use crate::narrative::models::{Avatar, Narrative};
use crate::narrative::{describe_avatars, format_history, generate_extraction, load_history, Deps};
use crate::prompt_store::PromptType;
use crate::templating::SubstitutionContext;

const DEFAULT_NARRATIVE_COUNT: u32 = 3;
const MAX_NARRATIVE_COUNT: u32 = 6;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateNarrativesRequest {
    #[serde(default)]
    pub avatars: Vec<Avatar>,
    #[serde(default)]
    pub church_name: Option<String>,
    #[serde(default)]
    pub research_summary: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateNarrativesResponse {
    pub narratives: Vec<Narrative>,
    /// True when the reply was not JSON and was kept as a single plain-text narrative.
    pub degraded: bool,
}

/// Shapes the model is known to answer with.
#[derive(Deserialize)]
#[serde(untagged)]
enum NarrativesPayload {
    Wrapped { narratives: Vec<Narrative> },
    List(Vec<Narrative>),
    Single(Narrative),
}

impl From<NarrativesPayload> for Vec<Narrative> {
    fn from(payload: NarrativesPayload) -> Self {
        match payload {
            NarrativesPayload::Wrapped { narratives } | NarrativesPayload::List(narratives) => {
                narratives
            }
            NarrativesPayload::Single(narrative) => vec![narrative],
        }
    }
}

pub async fn generate_narratives(
    deps: &Deps<'_>,
    session_id: Uuid,
    request: GenerateNarrativesRequest,
    cancel: &CancellationToken,
) -> Result<GenerateNarrativesResponse, AppError> {
    let count = request
        .count
        .unwrap_or(DEFAULT_NARRATIVE_COUNT)
        .clamp(1, MAX_NARRATIVE_COUNT);

    let history = load_history(deps.store, session_id).await;
    if history.is_empty() {
        warn!("Session {session_id}: generating narratives without any conversation");
    }

    let context = SubstitutionContext::new()
        .with("avatars", describe_avatars(&request.avatars))
        .with("church_name", request.church_name.unwrap_or_default())
        .with("research_summary", request.research_summary.unwrap_or_default())
        .with("conversation_history", format_history(&history))
        .with("narrative_count", count.to_string());

    let params = GenerationParams {
        max_tokens: 2000,
        temperature: 0.7,
    };
    let extraction = generate_extraction(
        deps,
        PromptType::NarrativeGeneration,
        &context,
        params,
        cancel,
    )
    .await?;

    let (narratives, degraded) = match extraction.parse_as::<NarrativesPayload>() {
        Ok(payload) => (Vec::from(payload), false),
        Err(text) => (vec![Narrative::untitled(text)], true),
    };

    save_json(deps.store, &session_key(session_id, NARRATIVES_KEY), &narratives).await;
    info!(
        "Session {session_id}: {} narratives generated (degraded: {degraded})",
        narratives.len()
    );

    Ok(GenerateNarrativesResponse {
        narratives,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::kv_store::{load_json, save_json, MESSAGES_KEY};
    use crate::narrative::models::{AvatarRole, ConversationMessage};
    use crate::testing::{test_state, Reply, ScriptedGenerator};

    fn request() -> GenerateNarrativesRequest {
        GenerateNarrativesRequest {
            avatars: vec![Avatar {
                role: AvatarRole::Church,
                name: "Grace Chapel".to_string(),
                description: "Small rural congregation".to_string(),
            }],
            church_name: Some("Grace Chapel".to_string()),
            research_summary: Some("Aging town, closed grocery store".to_string()),
            count: None,
        }
    }

    async fn cached(deps: &Deps<'_>, session: Uuid) -> Option<Vec<Narrative>> {
        load_json(deps.store, &session_key(session, NARRATIVES_KEY)).await
    }

    #[tokio::test]
    async fn test_fenced_json_reply_is_parsed_and_cached() {
        let reply = "Here you go:\n```json\n{\"narratives\": [\
            {\"title\": \"A Table for All\", \"content\": \"We feed.\"},\
            {\"title\": \"Open Doors\", \"content\": \"We welcome.\"},]}\n```";
        let generator = Arc::new(ScriptedGenerator::new().reply("[narratives]", reply));
        let state = test_state(generator.clone());
        let deps = Deps::from_state(&state);
        let session = Uuid::new_v4();

        let response = generate_narratives(&deps, session, request(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!response.degraded);
        assert_eq!(response.narratives.len(), 2);
        assert_eq!(response.narratives[1].title, "Open Doors");
        assert_eq!(cached(&deps, session).await, Some(response.narratives));
    }

    #[tokio::test]
    async fn test_prompt_carries_context_and_json_sample() {
        let generator = Arc::new(ScriptedGenerator::new().reply("[narratives]", "[]"));
        let state = test_state(generator.clone());
        let deps = Deps::from_state(&state);
        let session = Uuid::new_v4();
        save_json(
            deps.store,
            &session_key(session, MESSAGES_KEY),
            &vec![ConversationMessage::from_user("We want to serve families")],
        )
        .await;

        let mut req = request();
        req.count = Some(2);
        generate_narratives(&deps, session, req, &CancellationToken::new())
            .await
            .unwrap();

        let prompt = &generator.requests()[0].messages[1].content;
        assert!(prompt.contains("Grace Chapel (church): Small rural congregation"));
        assert!(prompt.contains("Research: Aging town, closed grocery store"));
        assert!(prompt.contains("User: We want to serve families"));
        assert!(prompt.contains("Write 2 narratives"));
        assert!(prompt.contains("{\"narratives\": [{\"title\": \"\", \"content\": \"\"}]}"));
    }

    #[tokio::test]
    async fn test_bare_array_and_single_object_are_accepted() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .reply("[narratives]", "{\"title\": \"Only one\", \"narrative\": \"Text\"}"),
        );
        let state = test_state(generator);
        let deps = Deps::from_state(&state);

        let response =
            generate_narratives(&deps, Uuid::new_v4(), request(), &CancellationToken::new())
                .await
                .unwrap();

        assert_eq!(response.narratives.len(), 1);
        assert_eq!(response.narratives[0].title, "Only one");
        assert_eq!(response.narratives[0].content, "Text");
    }

    #[tokio::test]
    async fn test_empty_list_is_returned_as_is() {
        let generator = Arc::new(ScriptedGenerator::new().reply("[narratives]", "{\"narratives\": []}"));
        let state = test_state(generator);
        let deps = Deps::from_state(&state);

        let response =
            generate_narratives(&deps, Uuid::new_v4(), request(), &CancellationToken::new())
                .await
                .unwrap();

        assert!(response.narratives.is_empty());
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn test_prose_reply_falls_back_to_single_narrative() {
        let generator = Arc::new(
            ScriptedGenerator::new().reply("[narratives]", "  Your church is called to hospitality.  "),
        );
        let state = test_state(generator);
        let deps = Deps::from_state(&state);

        let response =
            generate_narratives(&deps, Uuid::new_v4(), request(), &CancellationToken::new())
                .await
                .unwrap();

        assert!(response.degraded);
        assert_eq!(
            response.narratives,
            vec![Narrative::untitled("Your church is called to hospitality.")]
        );
    }

    #[tokio::test]
    async fn test_failures_leave_cache_untouched() {
        let generator = Arc::new(ScriptedGenerator::new().on("[narratives]", Reply::Empty));
        let state = test_state(generator);
        let deps = Deps::from_state(&state);
        let session = Uuid::new_v4();

        let err = generate_narratives(&deps, session, request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed(_)));

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = generate_narratives(&deps, session, request(), &cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Aborted));

        assert_eq!(cached(&deps, session).await, None);
    }

    #[tokio::test]
    async fn test_reply_arriving_after_cancel_is_discarded() {
        let generator = Arc::new(ScriptedGenerator::new().on(
            "[narratives]",
            Reply::CancelThen("{\"narratives\": [{\"title\": \"T\", \"content\": \"C\"}]}".to_string()),
        ));
        let state = test_state(generator);
        let deps = Deps::from_state(&state);
        let session = Uuid::new_v4();
        let token = CancellationToken::new();

        let err = generate_narratives(&deps, session, request(), &token)
            .await
            .unwrap_err();

        assert!(token.is_cancelled());
        assert!(matches!(err, AppError::Aborted));
        assert_eq!(cached(&deps, session).await, None);
    }
}
