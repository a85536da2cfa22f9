//! Generation pipeline: drive the model stream, tee to the caller, save.
//!
//! One call flows context build → pre hooks → tool merge → model stream →
//! tee (bytes out, accumulate in) → tool loop → save (fragment, chain,
//! post hooks, librarian trigger, log). Caller cancellation stops only the
//! byte side; the accumulator always runs to a natural end so a call saves
//! at most one fragment. A provider error persists nothing.

pub mod log;
pub mod tee;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use storyloom_protocol::fragment::meta_keys;
use storyloom_protocol::{
    FinishReason, Fragment, FragmentType, GenerationLog, GenerationMode, ModelEvent, PromptBlock,
    ToolCallRecord, ToolSpec, ids,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::chain::ProseChain;
use crate::context::assemble::{AssembleOptions, assemble_messages};
use crate::context::ContextBuilder;
use crate::error::{CoreError, Result};
use crate::generation::log::GenerationLogStore;
use crate::generation::tee::{ByteFeed, ByteSink};
use crate::librarian::LibrarianScheduler;
use crate::locks::StoryLocks;
use crate::plugins::{GenerationDraft, Plugin, PluginRegistry};
use crate::provider::{ModelClient, ModelRequest, ProviderRegistry, ResolvedModel};
use crate::store::FragmentStore;
use crate::tools::FragmentTools;

/// One generate call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub story_id: String,
    pub input: String,
    pub mode: GenerationMode,
    /// Required for regenerate/refine: the source passage.
    pub fragment_id: Option<String>,
    /// When false the call is a pure preview: text streams out, nothing is
    /// persisted.
    pub save_result: bool,
}

/// What a finished call produced.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub fragment_id: Option<String>,
    pub text: String,
    pub step_count: u32,
    pub finish_reason: FinishReason,
    pub steps_exceeded: bool,
    pub log_id: Option<String>,
}

/// Caller handle: the byte stream, a cancellation token for disconnects,
/// and the save outcome.
#[derive(Debug)]
pub struct GenerationHandle {
    pub stream: ByteFeed,
    pub cancel: CancellationToken,
    outcome: oneshot::Receiver<Result<GenerationOutcome>>,
}

impl GenerationHandle {
    /// Drain the byte stream to completion, returning the streamed text.
    pub async fn collect_text(&mut self) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = self.stream.next().await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&out).to_string()
    }

    /// Wait for the accumulate-and-save side. Dropping the handle's stream
    /// first is fine; the save path never depends on the byte side.
    pub async fn outcome(self) -> Result<GenerationOutcome> {
        self.outcome
            .await
            .map_err(|_| CoreError::Internal("generation task ended unexpectedly".to_string()))?
    }
}

/// Routes tool calls to the built-in toolset or a shadowing plugin.
struct ToolRouter {
    builtin: Arc<FragmentTools>,
    plugin_tools: HashMap<String, Arc<dyn Plugin>>,
}

impl ToolRouter {
    /// Merge built-in and plugin tool specs. A same-name collision resolves
    /// last-registered-wins with a warning.
    fn merge(builtin: &Arc<FragmentTools>, plugins: &[Arc<dyn Plugin>]) -> (Vec<ToolSpec>, Self) {
        let mut specs: Vec<ToolSpec> = builtin.specs();
        let mut plugin_tools: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
        for plugin in plugins {
            for spec in plugin.tools() {
                if let Some(existing) = specs.iter().position(|s| s.name == spec.name) {
                    tracing::warn!(
                        tool = %spec.name,
                        plugin = plugin.name(),
                        "tool name collision, last registration wins"
                    );
                    specs.remove(existing);
                }
                plugin_tools.insert(spec.name.clone(), plugin.clone());
                specs.push(spec);
            }
        }
        (
            specs,
            Self {
                builtin: builtin.clone(),
                plugin_tools,
            },
        )
    }

    async fn invoke(&self, story_id: &str, name: &str, args: Value) -> Value {
        if let Some(plugin) = self.plugin_tools.get(name) {
            return match plugin.call_tool(story_id, name, args).await {
                Ok(value) => value,
                Err(err) => json!({"error": {"code": "Internal", "message": err.to_string()}}),
            };
        }
        self.builtin.invoke(story_id, name, args).await
    }
}

pub struct Generator {
    pub(crate) store: Arc<FragmentStore>,
    pub(crate) chain: Arc<ProseChain>,
    pub(crate) context: Arc<ContextBuilder>,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) tools: Arc<FragmentTools>,
    pub(crate) librarian: Arc<LibrarianScheduler>,
    pub(crate) logs: Arc<GenerationLogStore>,
    pub(crate) locks: Arc<StoryLocks>,
}

impl Generator {
    /// Run one generate call. Precondition and context/hook errors surface
    /// here; streaming-phase errors surface through the outcome.
    pub async fn generate(self: &Arc<Self>, request: GenerateRequest) -> Result<GenerationHandle> {
        if request.input.trim().is_empty() {
            return Err(CoreError::InvalidArgument("input is empty".to_string()));
        }

        let source = match request.mode {
            GenerationMode::Generate => None,
            GenerationMode::Regenerate | GenerationMode::Refine => {
                let fragment_id = request.fragment_id.as_deref().ok_or_else(|| {
                    CoreError::InvalidArgument(format!(
                        "mode {} requires a fragment id",
                        request.mode
                    ))
                })?;
                let fragment = self.store.get(&request.story_id, fragment_id)?;
                if fragment.kind != FragmentType::Prose {
                    return Err(CoreError::InvalidArgument(format!(
                        "fragment {fragment_id} is not prose"
                    )));
                }
                Some(fragment)
            }
        };

        // Refine rewrites the effective input to carry the current passage;
        // the raw input is what gets recorded in meta and the log.
        let effective_input = match (&request.mode, &source) {
            (GenerationMode::Refine, Some(src)) => format!(
                "Rewrite the following passage per the instruction.\n\n## Current Passage\n{}\n\n## Instruction\n{}",
                src.content, request.input
            ),
            _ => request.input.clone(),
        };

        let mut state = self.context.build(
            &request.story_id,
            &effective_input,
            source.as_ref().map(|f| f.id.as_str()),
        )?;
        let enabled = self.plugins.enabled_for(&state.story.settings);

        for plugin in &enabled {
            state = plugin.before_context(state).await.map_err(|err| {
                CoreError::Internal(format!("plugin {} before_context: {err}", plugin.name()))
            })?;
        }

        let (tool_specs, router) = ToolRouter::merge(&self.tools, &enabled);
        let plugin_specs: Vec<ToolSpec> = enabled.iter().flat_map(|p| p.tools()).collect();

        let mut messages = assemble_messages(
            &state,
            &AssembleOptions {
                extra_tools: plugin_specs,
            },
        );
        for plugin in &enabled {
            messages = plugin.before_generation(messages).await.map_err(|err| {
                CoreError::Internal(format!("plugin {} before_generation: {err}", plugin.name()))
            })?;
        }

        let resolved = self.providers.resolve(&state.story.settings)?;
        let client = self.providers.client_for(&resolved.provider_id)?;
        let max_steps = state.story.settings.max_steps.max(1);

        let cancel = CancellationToken::new();
        let (sink, feed) = ByteSink::channel(cancel.clone());
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let drive = DriveContext {
            generator: self.clone(),
            request,
            source,
            enabled,
            router,
            tool_specs,
            messages,
            resolved,
            client,
            max_steps,
        };
        tokio::spawn(async move {
            let result = drive.run(sink).await;
            if let Err(err) = &result {
                tracing::warn!(%err, "generation failed");
            }
            let _ = outcome_tx.send(result);
        });

        Ok(GenerationHandle {
            stream: feed,
            cancel,
            outcome: outcome_rx,
        })
    }
}

/// Everything the spawned driver owns.
struct DriveContext {
    generator: Arc<Generator>,
    request: GenerateRequest,
    source: Option<Fragment>,
    enabled: Vec<Arc<dyn Plugin>>,
    router: ToolRouter,
    tool_specs: Vec<ToolSpec>,
    messages: Vec<PromptBlock>,
    resolved: ResolvedModel,
    client: Arc<dyn ModelClient>,
    max_steps: u32,
}

impl DriveContext {
    async fn run(mut self, mut sink: ByteSink) -> Result<GenerationOutcome> {
        let started = Instant::now();
        let initial_messages = self.messages.clone();
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut step_count: u32 = 0;
        let mut finish_reason = FinishReason::Stop;

        loop {
            step_count += 1;
            let mut stream = self
                .client
                .stream(ModelRequest {
                    model: self.resolved.model.clone(),
                    messages: self.messages.clone(),
                    tools: self.tool_specs.clone(),
                })
                .await?;

            let mut pending: Vec<(String, String, Value)> = Vec::new();
            while let Some(event) = stream.next().await {
                match event? {
                    ModelEvent::Text { text: delta } => {
                        // Bytes first, then the accumulator advances; the
                        // slower consumer throttles the provider naturally.
                        sink.send_text(&delta).await;
                        text.push_str(&delta);
                    }
                    ModelEvent::ToolCall { id, name, args } => {
                        pending.push((id, name, args));
                    }
                    ModelEvent::Done { finish_reason: fr } => {
                        finish_reason = fr;
                    }
                    ModelEvent::Reasoning { .. }
                    | ModelEvent::ToolResult { .. }
                    | ModelEvent::PrewriterText { .. }
                    | ModelEvent::PrewriterDirections { .. }
                    | ModelEvent::Phase { .. } => {}
                }
            }

            if pending.is_empty() || !self.request.save_result {
                break;
            }
            for (id, name, args) in pending {
                let result = self
                    .router
                    .invoke(&self.request.story_id, &name, args.clone())
                    .await;
                let is_error = result.get("error").is_some();
                self.messages.push(PromptBlock::assistant(
                    json!({"toolCall": {"id": id, "name": name, "args": args}}).to_string(),
                    "tool-call",
                ));
                self.messages.push(PromptBlock::user(
                    json!({"toolResult": {"id": id, "name": name, "result": result}}).to_string(),
                    "tool-result",
                ));
                tool_calls.push(ToolCallRecord {
                    id,
                    name,
                    args,
                    result: Some(result),
                    is_error,
                });
            }
            if step_count >= self.max_steps {
                break;
            }
        }

        let steps_exceeded = step_count >= self.max_steps && finish_reason != FinishReason::Stop;

        if !self.request.save_result {
            return Ok(GenerationOutcome {
                fragment_id: None,
                text,
                step_count,
                finish_reason,
                steps_exceeded,
                log_id: None,
            });
        }

        // after_generation may rewrite the text; hook errors are logged and
        // swallowed so the save applies either way.
        let mut draft = GenerationDraft {
            text,
            fragment_id: self.source.as_ref().map(|f| f.id.clone()),
            tool_calls,
        };
        for plugin in &self.enabled {
            match plugin.after_generation(draft.clone()).await {
                Ok(next) => draft = next,
                Err(err) => {
                    tracing::warn!(plugin = plugin.name(), %err, "after_generation hook failed");
                }
            }
        }

        let fragment = self.save_fragment(&draft).await?;

        for plugin in self.enabled.clone() {
            let fragment = fragment.clone();
            let story_id = self.request.story_id.clone();
            tokio::spawn(async move {
                if let Err(err) = plugin.after_save(&fragment, &story_id).await {
                    tracing::warn!(plugin = plugin.name(), %err, "after_save hook failed");
                }
            });
        }

        self.generator
            .librarian
            .trigger(&self.request.story_id, Some(fragment.id.clone()));

        let log = GenerationLog {
            id: ids::log_id(),
            story_id: self.request.story_id.clone(),
            input: self.request.input.clone(),
            mode: self.request.mode,
            messages: initial_messages,
            tool_calls: draft.tool_calls.clone(),
            text: draft.text.clone(),
            fragment_id: Some(fragment.id.clone()),
            provider_id: self.resolved.provider_id.clone(),
            model: self.resolved.model.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            step_count,
            finish_reason,
            steps_exceeded,
            created_at: Utc::now(),
        };
        let log_id = self.generator.logs.append_best_effort(&log);

        Ok(GenerationOutcome {
            fragment_id: Some(fragment.id),
            text: draft.text,
            step_count,
            finish_reason,
            steps_exceeded,
            log_id,
        })
    }

    /// Create the prose fragment and extend the chain, as one critical
    /// section under the story lock (a concurrent regenerate of the same
    /// section must not fork a second section).
    async fn save_fragment(&self, draft: &GenerationDraft) -> Result<Fragment> {
        let generator = &self.generator;
        let story_id = &self.request.story_id;
        let lock = generator.locks.for_story(story_id);
        let _guard = lock.lock().await;

        let mut fragment = match &self.source {
            Some(src) => {
                let mut fragment = Fragment::new(FragmentType::Prose, src.name.clone());
                fragment.tags = src.tags.clone();
                fragment.refs = src.refs.clone();
                fragment.sticky = src.sticky;
                fragment.placement = src.placement;
                fragment.order = src.order;
                fragment.meta = src.meta.clone();
                fragment
                    .meta
                    .insert(meta_keys::PREVIOUS_FRAGMENT_ID.to_string(), json!(src.id));
                fragment
                    .meta
                    .insert(meta_keys::VARIATION_OF.to_string(), json!(src.id));
                fragment
            }
            None => {
                let section_count = generator.chain.get(story_id)?.len();
                Fragment::new(
                    FragmentType::Prose,
                    format!("Passage {}", section_count + 1),
                )
            }
        };
        fragment.content = draft.text.clone();
        fragment.meta.insert(
            meta_keys::GENERATED_FROM.to_string(),
            json!(self.request.input),
        );
        fragment.meta.insert(
            meta_keys::GENERATION_MODE.to_string(),
            json!(self.request.mode.to_string()),
        );

        let fragment = generator.store.create(story_id, fragment)?;

        match (&self.request.mode, &self.source) {
            (GenerationMode::Generate, _) | (_, None) => {
                generator.chain.add_section(story_id, &fragment)?;
            }
            (_, Some(src)) => {
                match generator.chain.find_section_index(story_id, &src.id)? {
                    Some(section) => {
                        generator.chain.add_variation(story_id, section, &fragment)?
                    }
                    // Source fell out of the chain: start a fresh section.
                    None => {
                        generator.chain.add_section(story_id, &fragment)?;
                    }
                }
            }
        }
        Ok(fragment)
    }
}
