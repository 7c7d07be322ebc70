use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::narrative::conversation::{self, RespondRequest, RespondResponse};
use crate::narrative::generation::{self, GenerateNarrativesRequest, GenerateNarrativesResponse};
use crate::narrative::models::{ConversationMessage, Scenario};
use crate::narrative::scenarios::{self, RefineRequest, RefineResponse, SelectScenariosRequest};
use crate::narrative::vocational::{self, DraftStatementsRequest, DraftStatementsResponse};
use crate::narrative::{load_history, Deps};
use crate::prompt_store::PromptTemplate;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// GET /api/v1/prompts/:prompt_type
pub async fn handle_get_prompt(
    State(state): State<AppState>,
    Path(prompt_type): Path<String>,
) -> Result<Json<PromptTemplate>, AppError> {
    let template = state.prompts.fetch(&prompt_type).await?;
    Ok(Json(template))
}

/// POST /api/v1/sessions
pub async fn handle_create_session() -> (StatusCode, Json<SessionCreated>) {
    (
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: Uuid::new_v4(),
        }),
    )
}

/// GET /api/v1/sessions/:id/messages
pub async fn handle_get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Json<Vec<ConversationMessage>> {
    Json(load_history(state.store.as_ref(), session_id).await)
}

/// POST /api/v1/sessions/:id/messages
pub async fn handle_post_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, AppError> {
    // Dropped when the client disconnects, which aborts the generation.
    let guard = state.in_flight.begin(session_id);
    let deps = Deps::from_state(&state);
    let response = conversation::respond(&deps, session_id, req, guard.token()).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/narratives
pub async fn handle_generate_narratives(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<GenerateNarrativesRequest>,
) -> Result<Json<GenerateNarrativesResponse>, AppError> {
    let guard = state.in_flight.begin(session_id);
    let deps = Deps::from_state(&state);
    let response = generation::generate_narratives(&deps, session_id, req, guard.token()).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/vocational-statements
pub async fn handle_draft_statements(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<DraftStatementsRequest>,
) -> Result<Json<DraftStatementsResponse>, AppError> {
    let guard = state.in_flight.begin(session_id);
    let deps = Deps::from_state(&state);
    let response = vocational::draft_statements(&deps, session_id, req, guard.token()).await?;
    Ok(Json(response))
}

/// GET /api/v1/sessions/:id/scenarios/selected
pub async fn handle_get_selected(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Json<Vec<Scenario>> {
    Json(scenarios::selected(&Deps::from_state(&state), session_id).await)
}

/// PUT /api/v1/sessions/:id/scenarios/selected
pub async fn handle_select_scenarios(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SelectScenariosRequest>,
) -> Json<Vec<Scenario>> {
    Json(scenarios::select(&Deps::from_state(&state), session_id, req.scenarios).await)
}

/// POST /api/v1/sessions/:id/scenarios/refine
pub async fn handle_refine(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RefineRequest>,
) -> Result<Json<RefineResponse>, AppError> {
    let guard = state.in_flight.begin(session_id);
    let deps = Deps::from_state(&state);
    let response = scenarios::refine(&deps, session_id, req, guard.token()).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.in_flight.cancel(session_id),
    })
}
