//! Story container metadata and per-story settings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the user section of the context window is ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContextOrderMode {
    /// Fixed block order: summary, characters, guidelines, knowledge, prose.
    #[default]
    Default,
    /// `fragment_order` decides; unmentioned fragments keep default order.
    Advanced,
}

fn default_output_format() -> String {
    "markdown".to_string()
}

fn default_summarization_threshold() -> usize {
    12
}

fn default_max_steps() -> u32 {
    10
}

/// Per-story knobs. Everything is defaulted so settings written by older
/// builds keep deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySettings {
    /// Output format hint passed to the writer instructions.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Plugin names active for this story, in registration order.
    #[serde(default)]
    pub enabled_plugins: Vec<String>,
    /// Chain length beyond which older prose is replaced by the summary.
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: usize,
    /// Hard cap on model round-trips in one generate call.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Provider override; falls back to the registry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Model override; falls back to the provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub context_order_mode: ContextOrderMode,
    /// Explicit fragment ordering used when `context_order_mode` is advanced.
    #[serde(default)]
    pub fragment_order: Vec<String>,
    /// Agent name -> replacement base instructions.
    #[serde(default)]
    pub agent_prompt_overrides: HashMap<String, String>,
}

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            enabled_plugins: Vec::new(),
            summarization_threshold: default_summarization_threshold(),
            max_steps: default_max_steps(),
            provider_id: None,
            model: None,
            context_order_mode: ContextOrderMode::Default,
            fragment_order: Vec::new(),
            agent_prompt_overrides: HashMap::new(),
        }
    }
}

/// Story container: stable id, human metadata, settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rolling story summary maintained by the librarian / user.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub settings: StorySettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoryMeta {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: crate::ids::story_id(),
            name: name.into(),
            description: String::new(),
            summary: String::new(),
            settings: StorySettings::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
