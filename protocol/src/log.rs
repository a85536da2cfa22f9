//! Generation log: the append-only audit record of one generate call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::FinishReason;
use crate::message::PromptBlock;
use crate::tool::ToolCallRecord;

/// How a generate call relates to existing prose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GenerationMode {
    /// Fresh passage appended as a new section.
    Generate,
    /// Alternate take of an existing passage.
    Regenerate,
    /// Rewrite of an existing passage following an instruction.
    Refine,
}

/// One audit record, written after every save-producing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationLog {
    pub id: String,
    pub story_id: String,
    /// The caller's raw input (not the refine-rewritten form).
    pub input: String,
    pub mode: GenerationMode,
    /// The full composed message list as sent on the first round-trip.
    pub messages: Vec<PromptBlock>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Accumulated generated text.
    pub text: String,
    /// The fragment the call produced, when it saved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<String>,
    pub provider_id: String,
    /// Resolved model id actually used.
    pub model: String,
    pub duration_ms: u64,
    pub step_count: u32,
    pub finish_reason: FinishReason,
    /// True when the tool loop hit `max_steps` without a natural stop.
    #[serde(default)]
    pub steps_exceeded: bool,
    pub created_at: DateTime<Utc>,
}
