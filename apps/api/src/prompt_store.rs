//! Prompt Store: named prompt templates, edited out-of-band and fetched on demand.
//!
//! `AppState` holds an `Arc<dyn PromptStore>`; production reads PostgreSQL,
//! tests and local runs can seed a `MemoryPromptStore`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::errors::AppError;

/// A stored template. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PromptTemplate {
    pub prompt_type: String,
    #[sqlx(rename = "prompt")]
    #[serde(rename = "prompt")]
    pub body: String,
}

impl PromptTemplate {
    pub fn new(prompt_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            prompt_type: prompt_type.into(),
            body: body.into(),
        }
    }
}

/// Logical template keys used by the narrative services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    ConversationSystem,
    AvatarChurch,
    AvatarCommunity,
    CompanionResponse,
    NarrativeGeneration,
    VocationalStatement,
    ScenarioRefinement,
}

impl PromptType {
    pub const ALL: [PromptType; 7] = [
        PromptType::ConversationSystem,
        PromptType::AvatarChurch,
        PromptType::AvatarCommunity,
        PromptType::CompanionResponse,
        PromptType::NarrativeGeneration,
        PromptType::VocationalStatement,
        PromptType::ScenarioRefinement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::ConversationSystem => "conversation_system",
            PromptType::AvatarChurch => "avatar_church",
            PromptType::AvatarCommunity => "avatar_community",
            PromptType::CompanionResponse => "companion_response",
            PromptType::NarrativeGeneration => "narrative_generation",
            PromptType::VocationalStatement => "vocational_statement",
            PromptType::ScenarioRefinement => "scenario_refinement",
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PromptType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::TemplateNotFound(s.to_string()))
    }
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Fetches the template for `prompt_type`, or `AppError::TemplateNotFound`.
    async fn fetch(&self, prompt_type: &str) -> Result<PromptTemplate, AppError>;
}

/// Reads templates from the `prompts` table.
pub struct PgPromptStore {
    pool: PgPool,
}

impl PgPromptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromptStore for PgPromptStore {
    async fn fetch(&self, prompt_type: &str) -> Result<PromptTemplate, AppError> {
        debug!("Fetching prompt template '{prompt_type}'");
        sqlx::query_as::<_, PromptTemplate>(
            "SELECT prompt_type, prompt FROM prompts WHERE prompt_type = $1",
        )
        .bind(prompt_type)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::TemplateNotFound(prompt_type.to_string()))
    }
}

/// In-process template map.
#[derive(Debug, Default, Clone)]
pub struct MemoryPromptStore {
    templates: HashMap<String, String>,
}

impl MemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, prompt_type: impl ToString, body: impl Into<String>) -> Self {
        self.templates.insert(prompt_type.to_string(), body.into());
        self
    }
}

#[async_trait]
impl PromptStore for MemoryPromptStore {
    async fn fetch(&self, prompt_type: &str) -> Result<PromptTemplate, AppError> {
        self.templates
            .get(prompt_type)
            .map(|body| PromptTemplate::new(prompt_type, body.clone()))
            .ok_or_else(|| AppError::TemplateNotFound(prompt_type.to_string()))
    }
}
