use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::LlmError;

/// Non-standard "client closed request" status used for aborted generations.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Extraction failures never appear here: they are recovered as plain-text fallbacks.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Prompt template not found: {0}")]
    TemplateNotFound(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Rate limited by the AI provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Generation aborted")]
    Aborted,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            err if err.is_aborted() => AppError::Aborted,
            LlmError::RateLimited { retry_after } => AppError::RateLimited {
                retry_after_secs: retry_after.map(|d| d.as_secs().max(1)),
            },
            other => AppError::GenerationFailed(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::TemplateNotFound(prompt_type) => {
                tracing::warn!("Prompt template missing: {prompt_type}");
                (
                    StatusCode::NOT_FOUND,
                    "TEMPLATE_NOT_FOUND",
                    format!("No prompt template configured for '{prompt_type}'"),
                )
            }
            AppError::GenerationFailed(msg) => {
                tracing::error!("Generation failed: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "GENERATION_FAILED",
                    "The AI could not generate a response. Please try again.".to_string(),
                )
            }
            AppError::RateLimited { retry_after_secs } => {
                tracing::warn!("Rate limited by provider (retry after {retry_after_secs:?}s)");
                let message = match retry_after_secs {
                    Some(secs) => format!("The AI is busy right now. Try again in {secs} seconds."),
                    None => "The AI is busy right now. Try again shortly.".to_string(),
                };
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
            }
            AppError::Aborted => {
                tracing::debug!("Request aborted");
                (
                    StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
                    "ABORTED",
                    "Generation was cancelled".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
