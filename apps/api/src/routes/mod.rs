pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::narrative::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/prompts/:prompt_type",
            get(handlers::handle_get_prompt),
        )
        // Discovery sessions
        .route("/api/v1/sessions", post(handlers::handle_create_session))
        .route(
            "/api/v1/sessions/:id/messages",
            get(handlers::handle_get_messages).post(handlers::handle_post_message),
        )
        .route(
            "/api/v1/sessions/:id/narratives",
            post(handlers::handle_generate_narratives),
        )
        .route(
            "/api/v1/sessions/:id/vocational-statements",
            post(handlers::handle_draft_statements),
        )
        .route(
            "/api/v1/sessions/:id/scenarios/selected",
            get(handlers::handle_get_selected).put(handlers::handle_select_scenarios),
        )
        .route(
            "/api/v1/sessions/:id/scenarios/refine",
            post(handlers::handle_refine),
        )
        .route("/api/v1/sessions/:id/cancel", post(handlers::handle_cancel))
        .with_state(state)
}
