//! Prompt blocks: the message contract with the LLM provider.

use serde::{Deserialize, Serialize};

/// Message role, canonical across providers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One block of the assembled context window. `source_tag` records which
/// assembly step produced the block so logs and plugins can tell the blocks
/// apart without parsing content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBlock {
    pub role: MessageRole,
    pub content: String,
    pub source_tag: String,
}

impl PromptBlock {
    pub fn new(role: MessageRole, content: impl Into<String>, source_tag: &str) -> Self {
        Self {
            role,
            content: content.into(),
            source_tag: source_tag.to_string(),
        }
    }

    pub fn system(content: impl Into<String>, source_tag: &str) -> Self {
        Self::new(MessageRole::System, content, source_tag)
    }

    pub fn user(content: impl Into<String>, source_tag: &str) -> Self {
        Self::new(MessageRole::User, content, source_tag)
    }

    pub fn assistant(content: impl Into<String>, source_tag: &str) -> Self {
        Self::new(MessageRole::Assistant, content, source_tag)
    }
}
