//! Typed events of a streaming generation.
//!
//! The model client emits these over a channel-backed stream; the pipeline
//! tees text to the caller while accumulating everything for the save path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why the final model round-trip stopped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolUse,
    MaxTokens,
    Error,
}

/// One event of the model stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModelEvent {
    /// Prose text delta; the only event forwarded to the caller's byte
    /// stream.
    Text { text: String },
    /// Model reasoning delta; surfaced to logs, never to the byte stream.
    Reasoning { text: String },
    /// The model requests a tool invocation.
    ToolCall { id: String, name: String, args: Value },
    /// Result of an executed tool, fed back into the next round-trip.
    ToolResult { id: String, name: String, result: Value },
    /// Prewriter scratch text (outline drafts before the prose phase).
    PrewriterText { text: String },
    /// Prewriter directions for the prose phase.
    PrewriterDirections { text: String },
    /// Phase transition marker (`prewrite`, `write`, ...).
    Phase { phase: String },
    /// Terminal event of one model round-trip.
    Done { finish_reason: FinishReason },
}
