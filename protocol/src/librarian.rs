//! Librarian records: background analysis state and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scheduler status per story. `Queued` is the debounce window between a
/// trigger and the run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Queued,
    Running,
    Error,
}

/// Persisted librarian state (`librarian/state.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarianState {
    #[serde(default)]
    pub run_status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_since: Option<DateTime<Utc>>,
}

/// A knowledge entry the librarian proposes creating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSuggestion {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_fragment_id: Option<String>,
}

/// An annotation diff targeted at one prose fragment's `meta.annotations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisAnnotation {
    pub fragment_id: String,
    pub annotations: Value,
}

/// One persisted analysis (`librarian/analyses/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub story_id: String,
    /// Chain length at the snapshot the analysis ran over.
    pub chain_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fragment_id: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub directions: Vec<String>,
    #[serde(default)]
    pub knowledge_suggestions: Vec<KnowledgeSuggestion>,
    #[serde(default)]
    pub annotations: Vec<AnalysisAnnotation>,
    pub created_at: DateTime<Utc>,
}
