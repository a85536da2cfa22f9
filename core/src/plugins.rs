//! Plugin hook points around the generation pipeline.
//!
//! Hooks are synchronous in control flow, async in body, and run in plugin
//! registration order. `before_context` and `before_generation` errors
//! abort the request; `after_generation` and `after_save` errors are
//! logged and swallowed so a save is never partially applied. Plugins
//! transform by returning replacements, never by in-place mutation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use storyloom_protocol::{Fragment, PromptBlock, StorySettings, ToolCallRecord, ToolSpec};

use crate::context::ContextState;

/// Payload of the `after_generation` hook.
#[derive(Debug, Clone)]
pub struct GenerationDraft {
    pub text: String,
    /// Source fragment for regenerate/refine calls.
    pub fragment_id: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// One plugin. Every hook has a pass-through default, so plugins implement
/// only what they extend.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Tools this plugin contributes to every generation of stories that
    /// enable it.
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    /// Execute one of this plugin's tools. Plugins that persist through the
    /// engine tools inherit the same locked/frozen-section rejections.
    async fn call_tool(&self, story_id: &str, name: &str, args: Value) -> anyhow::Result<Value> {
        let _ = (story_id, args);
        anyhow::bail!("plugin has no tool named {name}")
    }

    async fn before_context(&self, state: ContextState) -> anyhow::Result<ContextState> {
        Ok(state)
    }

    async fn before_generation(
        &self,
        messages: Vec<PromptBlock>,
    ) -> anyhow::Result<Vec<PromptBlock>> {
        Ok(messages)
    }

    async fn after_generation(&self, draft: GenerationDraft) -> anyhow::Result<GenerationDraft> {
        Ok(draft)
    }

    async fn after_save(&self, fragment: &Fragment, story_id: &str) -> anyhow::Result<()> {
        let _ = (fragment, story_id);
        Ok(())
    }
}

/// Ordered plugin registry. Stories opt in by name through
/// `settings.enabled_plugins`.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Plugins enabled for a story, preserving registration order.
    pub fn enabled_for(&self, settings: &StorySettings) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| settings.enabled_plugins.iter().any(|n| n == p.name()))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }
}
