//! Vocational statements drafted from the narratives a church resonated with.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::kv_store::{load_json, save_json, session_key, NARRATIVES_KEY, VOCATIONAL_STATEMENT_KEY};
use crate::llm_client::GenerationParams;
use crate::narrative::models::{Narrative, VocationalStatement};
use crate::narrative::{generate_extraction, Deps};
use crate::prompt_store::PromptType;
use crate::templating::SubstitutionContext;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftStatementsRequest {
    /// Narratives to draw from; the session's cached narratives when omitted.
    #[serde(default)]
    pub narratives: Option<Vec<Narrative>>,
    #[serde(default)]
    pub church_name: Option<String>,
    #[serde(default)]
    pub research_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftStatementsResponse {
    pub statements: Vec<VocationalStatement>,
    pub degraded: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatementsPayload {
    Wrapped { statements: Vec<VocationalStatement> },
    List(Vec<VocationalStatement>),
    Single(VocationalStatement),
}

pub async fn draft_statements(
    deps: &Deps<'_>,
    session_id: Uuid,
    request: DraftStatementsRequest,
    cancel: &CancellationToken,
) -> Result<DraftStatementsResponse, AppError> {
    let narratives = match request.narratives {
        Some(narratives) => narratives,
        None => load_json(deps.store, &session_key(session_id, NARRATIVES_KEY))
            .await
            .unwrap_or_default(),
    };
    if narratives.is_empty() {
        return Err(AppError::Validation(
            "generate or supply narratives before drafting a vocational statement".to_string(),
        ));
    }

    let context = SubstitutionContext::new()
        .with("narratives", describe_narratives(&narratives))
        .with("church_name", request.church_name.unwrap_or_default())
        .with("research_summary", request.research_summary.unwrap_or_default());

    let params = GenerationParams {
        max_tokens: 1200,
        temperature: 0.7,
    };
    let extraction = generate_extraction(
        deps,
        PromptType::VocationalStatement,
        &context,
        params,
        cancel,
    )
    .await?;

    let (statements, degraded) = match extraction.parse_as::<StatementsPayload>() {
        Ok(StatementsPayload::Wrapped { statements }) | Ok(StatementsPayload::List(statements)) => {
            (statements, false)
        }
        Ok(StatementsPayload::Single(statement)) => (vec![statement], false),
        Err(text) => (vec![VocationalStatement::plain(text)], true),
    };

    save_json(
        deps.store,
        &session_key(session_id, VOCATIONAL_STATEMENT_KEY),
        &statements,
    )
    .await;
    info!(
        "Session {session_id}: {} vocational statements drafted from {} narratives",
        statements.len(),
        narratives.len()
    );

    Ok(DraftStatementsResponse {
        statements,
        degraded,
    })
}

fn describe_narratives(narratives: &[Narrative]) -> String {
    narratives
        .iter()
        .enumerate()
        .map(|(i, n)| format!("{}. {}\n{}", i + 1, n.title, n.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
