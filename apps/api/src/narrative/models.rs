use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompt_store::PromptType;

/// The three perspectives a church talks with during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarRole {
    Church,
    Community,
    Companion,
}

impl AvatarRole {
    pub fn prompt_type(&self) -> PromptType {
        match self {
            AvatarRole::Church => PromptType::AvatarChurch,
            AvatarRole::Community => PromptType::AvatarCommunity,
            AvatarRole::Companion => PromptType::CompanionResponse,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AvatarRole::Church => "church",
            AvatarRole::Community => "community",
            AvatarRole::Companion => "companion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    pub role: AvatarRole,
    pub name: String,
    /// Persona traits, voice, and background fed into the avatar's template.
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Church,
    Community,
    Companion,
}

impl From<AvatarRole> for Speaker {
    fn from(role: AvatarRole) -> Self {
        match role {
            AvatarRole::Church => Speaker::Church,
            AvatarRole::Community => Speaker::Community,
            AvatarRole::Companion => Speaker::Companion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub speaker: Speaker,
    /// Display name of the avatar; `None` for the user.
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker: Speaker::User,
            name: None,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn from_avatar(avatar: &Avatar, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker: avatar.role.into(),
            name: Some(avatar.name.clone()),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    #[serde(default = "untitled")]
    pub title: String,
    #[serde(alias = "narrative", alias = "text")]
    pub content: String,
}

fn untitled() -> String {
    "Narrative".to_string()
}

impl Narrative {
    pub fn untitled(content: impl Into<String>) -> Self {
        Self {
            title: untitled(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocationalStatement {
    #[serde(alias = "mission_statement", alias = "vocational_statement")]
    pub statement: String,
    #[serde(default, alias = "contextual_explanation")]
    pub rationale: Option<String>,
}

impl VocationalStatement {
    pub fn plain(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            rationale: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedScenario {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}
