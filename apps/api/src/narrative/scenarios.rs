//! Scenario selection and refinement into an actionable plan.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::kv_store::{
    load_json, save_json, session_key, SELECTED_SCENARIOS_KEY, VOCATIONAL_STATEMENT_KEY,
};
use crate::llm_client::GenerationParams;
use crate::narrative::models::{RefinedScenario, Scenario, VocationalStatement};
use crate::narrative::{generate_extraction, Deps};
use crate::prompt_store::PromptType;
use crate::templating::SubstitutionContext;

const FALLBACK_TITLE: &str = "Refined scenario";

#[derive(Debug, Clone, Deserialize)]
pub struct SelectScenariosRequest {
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefineRequest {
    /// Scenarios to refine; the session's selection when omitted or empty.
    #[serde(default)]
    pub scenarios: Option<Vec<Scenario>>,
    #[serde(default)]
    pub vocational_statement: Option<String>,
    /// Free-form direction from the user ("make it cheaper", "involve youth").
    #[serde(default)]
    pub guidance: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineResponse {
    pub refined: RefinedScenario,
    pub degraded: bool,
}

/// Replaces the session's selection. An empty list clears it. Storage is
/// best-effort: failures are logged and the selection is still echoed back.
pub async fn select(deps: &Deps<'_>, session_id: Uuid, scenarios: Vec<Scenario>) -> Vec<Scenario> {
    let key = session_key(session_id, SELECTED_SCENARIOS_KEY);
    if scenarios.is_empty() {
        if let Err(e) = deps.store.remove(&key).await {
            warn!("Failed to clear '{key}' from session store: {e:#}");
        }
    } else {
        save_json(deps.store, &key, &scenarios).await;
    }
    info!("Session {session_id}: {} scenarios selected", scenarios.len());
    scenarios
}

pub async fn selected(deps: &Deps<'_>, session_id: Uuid) -> Vec<Scenario> {
    load_json(deps.store, &session_key(session_id, SELECTED_SCENARIOS_KEY))
        .await
        .unwrap_or_default()
}

pub async fn refine(
    deps: &Deps<'_>,
    session_id: Uuid,
    request: RefineRequest,
    cancel: &CancellationToken,
) -> Result<RefineResponse, AppError> {
    let scenarios = match request.scenarios {
        Some(scenarios) if !scenarios.is_empty() => scenarios,
        _ => selected(deps, session_id).await,
    };
    if scenarios.is_empty() {
        return Err(AppError::Validation(
            "select at least one scenario to refine".to_string(),
        ));
    }

    let vocational_statement = match request.vocational_statement {
        Some(statement) => statement,
        None => cached_statement(deps, session_id).await.unwrap_or_else(|| {
            warn!("Session {session_id}: refining scenarios without a vocational statement");
            String::new()
        }),
    };

    let context = SubstitutionContext::new()
        .with("scenarios", describe_scenarios(&scenarios))
        .with("vocational_statement", vocational_statement)
        .with("guidance", request.guidance.unwrap_or_default());

    let params = GenerationParams {
        max_tokens: 1500,
        temperature: 0.6,
    };
    let extraction = generate_extraction(
        deps,
        PromptType::ScenarioRefinement,
        &context,
        params,
        cancel,
    )
    .await?;

    let (refined, degraded) = match extraction.parse_as::<RefinedScenario>() {
        Ok(refined) => (refined, false),
        Err(text) => (
            RefinedScenario {
                title: FALLBACK_TITLE.to_string(),
                summary: text,
                steps: Vec::new(),
            },
            true,
        ),
    };

    info!(
        "Session {session_id}: refined {} scenarios into '{}' ({} steps)",
        scenarios.len(),
        refined.title,
        refined.steps.len()
    );
    Ok(RefineResponse { refined, degraded })
}

async fn cached_statement(deps: &Deps<'_>, session_id: Uuid) -> Option<String> {
    let statements: Vec<VocationalStatement> =
        load_json(deps.store, &session_key(session_id, VOCATIONAL_STATEMENT_KEY)).await?;
    statements.into_iter().next().map(|s| s.statement)
}

fn describe_scenarios(scenarios: &[Scenario]) -> String {
    scenarios
        .iter()
        .map(|s| {
            if s.description.trim().is_empty() {
                format!("- {}", s.title)
            } else {
                format!("- {}: {}", s.title, s.description.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
