//! End-to-end generation pipeline scenarios against a scripted model.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use storyloom_core::error::CoreError;
use storyloom_core::generation::GenerateRequest;
use storyloom_core::plugins::{GenerationDraft, Plugin};
use storyloom_protocol::fragment::meta_keys;
use storyloom_protocol::{
    FinishReason, Fragment, FragmentType, GenerationMode, PromptBlock, ToolSpec,
};

use crate::common::{
    FailingClient, ScriptedClient, TestHarness, harness_with_client, text_round, tool_round,
};

fn generate_request(story_id: &str, input: &str) -> GenerateRequest {
    GenerateRequest {
        story_id: story_id.to_string(),
        input: input.to_string(),
        mode: GenerationMode::Generate,
        fragment_id: None,
        save_result: true,
    }
}

#[tokio::test]
async fn fresh_generate_appends_chain_section() {
    let client = ScriptedClient::new(vec![text_round(&["It began ", "at dusk."])]);
    let harness = harness_with_client(client);
    let engine = &harness.engine;

    let mut handle = engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    let streamed = handle.collect_text().await;
    assert_eq!(streamed, "It began at dusk.");

    let outcome = handle.outcome().await.unwrap();
    let fragment_id = outcome.fragment_id.unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert!(!outcome.steps_exceeded);

    let prose = engine
        .store
        .list(&harness.story_id, Some(&FragmentType::Prose), false)
        .unwrap();
    assert_eq!(prose.len(), 1);
    assert_eq!(prose[0].id, fragment_id);
    assert_eq!(prose[0].content, "It began at dusk.");
    assert_eq!(prose[0].meta_str(meta_keys::GENERATED_FROM), Some("Scene one."));
    assert_eq!(prose[0].meta_str(meta_keys::GENERATION_MODE), Some("generate"));

    let sections = engine.chain.get(&harness.story_id).unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].active, fragment_id);
}

#[tokio::test]
async fn regenerate_creates_variation_not_replacement() {
    let client = ScriptedClient::new(vec![text_round(&["A darker take."])]);
    let harness = harness_with_client(client);
    let engine = &harness.engine;

    let source = engine
        .store
        .create(
            &harness.story_id,
            Fragment::new(FragmentType::Prose, "Opening").with_content("The original."),
        )
        .unwrap();
    engine.chain.add_section(&harness.story_id, &source).unwrap();

    let handle = engine
        .generate(GenerateRequest {
            story_id: harness.story_id.clone(),
            input: "Darker tone.".to_string(),
            mode: GenerationMode::Regenerate,
            fragment_id: Some(source.id.clone()),
            save_result: true,
        })
        .await
        .unwrap();
    let outcome = handle.outcome().await.unwrap();
    let new_id = outcome.fragment_id.unwrap();

    // The source is untouched.
    let untouched = engine.store.get(&harness.story_id, &source.id).unwrap();
    assert_eq!(untouched.content, "The original.");
    assert_eq!(untouched.version, 1);

    let variation = engine.store.get(&harness.story_id, &new_id).unwrap();
    assert_eq!(variation.meta_str(meta_keys::VARIATION_OF), Some(source.id.as_str()));
    assert_eq!(
        variation.meta_str(meta_keys::PREVIOUS_FRAGMENT_ID),
        Some(source.id.as_str())
    );

    let sections = engine.chain.get(&harness.story_id).unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].prose_fragments, vec![source.id, new_id.clone()]);
    assert_eq!(sections[0].active, new_id);
}

#[tokio::test]
async fn refine_carries_the_passage_into_the_prompt() {
    let client = ScriptedClient::new(vec![text_round(&["Refined."])]);
    let harness = harness_with_client(client.clone());
    let engine = &harness.engine;

    let source = engine
        .store
        .create(
            &harness.story_id,
            Fragment::new(FragmentType::Prose, "Opening").with_content("The original passage."),
        )
        .unwrap();
    engine.chain.add_section(&harness.story_id, &source).unwrap();

    let handle = engine
        .generate(GenerateRequest {
            story_id: harness.story_id.clone(),
            input: "Make it rain.".to_string(),
            mode: GenerationMode::Refine,
            fragment_id: Some(source.id.clone()),
            save_result: true,
        })
        .await
        .unwrap();
    let outcome = handle.outcome().await.unwrap();

    let requests = client.requests.lock().unwrap();
    let input_block = requests[0]
        .messages
        .iter()
        .find(|b| b.source_tag == "input")
        .unwrap()
        .clone();
    assert!(input_block.content.contains("The original passage."));
    assert!(input_block.content.contains("Make it rain."));

    let saved = engine
        .store
        .get(&harness.story_id, &outcome.fragment_id.unwrap())
        .unwrap();
    // Raw input, not the rewritten form, lands in meta.
    assert_eq!(saved.meta_str(meta_keys::GENERATED_FROM), Some("Make it rain."));
    assert_eq!(saved.meta_str(meta_keys::GENERATION_MODE), Some("refine"));
}

#[tokio::test]
async fn save_false_streams_without_persisting() {
    let client = ScriptedClient::new(vec![text_round(&["Preview only."])]);
    let harness = harness_with_client(client);
    let engine = &harness.engine;

    let mut handle = engine
        .generate(GenerateRequest {
            save_result: false,
            ..generate_request(&harness.story_id, "Scene one.")
        })
        .await
        .unwrap();
    assert_eq!(handle.collect_text().await, "Preview only.");
    let outcome = handle.outcome().await.unwrap();
    assert!(outcome.fragment_id.is_none());
    assert!(outcome.log_id.is_none());

    assert!(engine
        .store
        .list(&harness.story_id, Some(&FragmentType::Prose), true)
        .unwrap()
        .is_empty());
    assert!(engine.chain.get(&harness.story_id).unwrap().is_empty());
    assert!(engine.logs.list(&harness.story_id).unwrap().is_empty());
}

#[tokio::test]
async fn preconditions_reject_bad_requests() {
    let client = ScriptedClient::new(vec![]);
    let harness = harness_with_client(client);
    let engine = &harness.engine;

    let err = engine
        .generate(generate_request(&harness.story_id, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));

    let err = engine
        .generate(GenerateRequest {
            mode: GenerationMode::Regenerate,
            ..generate_request(&harness.story_id, "Again.")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));

    let err = engine
        .generate(GenerateRequest {
            mode: GenerationMode::Regenerate,
            fragment_id: Some("pr-zzzzzz".to_string()),
            ..generate_request(&harness.story_id, "Again.")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn provider_error_persists_nothing() {
    let harness = harness_with_client(Arc::new(FailingClient {
        lead_text: "Partial ".to_string(),
    }));
    let engine = &harness.engine;

    let mut handle = engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    // Partial bytes may arrive before the failure closes the stream.
    let streamed = handle.collect_text().await;
    assert!(streamed.is_empty() || streamed == "Partial ");

    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)));
    assert!(engine
        .store
        .list(&harness.story_id, Some(&FragmentType::Prose), true)
        .unwrap()
        .is_empty());
    assert!(engine.chain.get(&harness.story_id).unwrap().is_empty());
}

#[tokio::test]
async fn caller_cancellation_never_cancels_the_save() {
    let chunks: Vec<String> = (0..100).map(|i| format!("w{i} ")).collect();
    let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let client = ScriptedClient::new(vec![text_round(&chunk_refs)]);
    let harness = harness_with_client(client);
    let engine = &harness.engine;

    let handle = engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    // Caller disconnects immediately.
    handle.cancel.cancel();

    let outcome = handle.outcome().await.unwrap();
    let fragment = engine
        .store
        .get(&harness.story_id, &outcome.fragment_id.unwrap())
        .unwrap();
    assert_eq!(fragment.content, chunks.concat());
    assert_eq!(
        engine
            .store
            .list(&harness.story_id, Some(&FragmentType::Prose), true)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn tool_loop_executes_and_feeds_results_back() {
    let client = ScriptedClient::new(vec![
        tool_round(&[(
            "call-1",
            "createFragment",
            json!({"type": "knowledge", "name": "The Pact", "content": "Binding."}),
        )]),
        text_round(&["With the pact recorded, onward."]),
    ]);
    let harness = harness_with_client(client.clone());
    let engine = &harness.engine;

    let handle = engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.step_count, 2);
    assert!(!outcome.steps_exceeded);

    // The tool ran for real.
    let knowledge = engine
        .store
        .list(&harness.story_id, Some(&FragmentType::Knowledge), false)
        .unwrap();
    assert_eq!(knowledge.len(), 1);
    assert_eq!(knowledge[0].name, "The Pact");

    // The second round-trip carried the tool result back to the model.
    assert_eq!(client.request_count(), 2);
    let requests = client.requests.lock().unwrap();
    assert!(requests[1]
        .messages
        .iter()
        .any(|b| b.source_tag == "tool-result" && b.content.contains("call-1")));

    let logs = engine.logs.list(&harness.story_id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].tool_calls.len(), 1);
    assert_eq!(logs[0].tool_calls[0].name, "createFragment");
    assert!(!logs[0].tool_calls[0].is_error);
    assert_eq!(logs[0].step_count, 2);
}

#[tokio::test]
async fn max_steps_caps_the_tool_loop() {
    let client = ScriptedClient::new(vec![
        tool_round(&[("call-1", "getFragment", json!({"id": "kn-zzzzzz"}))]),
        tool_round(&[("call-2", "getFragment", json!({"id": "kn-zzzzzz"}))]),
    ]);
    let harness = harness_with_client(client.clone());
    let engine = &harness.engine;

    let mut settings = engine.stories.get(&harness.story_id).unwrap().settings;
    settings.max_steps = 1;
    engine
        .stories
        .update_settings(&harness.story_id, settings)
        .unwrap();

    let handle = engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.step_count, 1);
    assert!(outcome.steps_exceeded);
    assert_eq!(client.request_count(), 1);

    let logs = engine.logs.list(&harness.story_id).unwrap();
    assert!(logs[0].steps_exceeded);
}

#[tokio::test]
async fn generation_log_records_the_call() {
    let client = ScriptedClient::new(vec![text_round(&["It began."])]);
    let harness = harness_with_client(client);
    let engine = &harness.engine;

    let handle = engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    let outcome = handle.outcome().await.unwrap();

    let log = engine
        .logs
        .get(&harness.story_id, &outcome.log_id.unwrap())
        .unwrap();
    assert_eq!(log.input, "Scene one.");
    assert_eq!(log.mode, GenerationMode::Generate);
    assert_eq!(log.model, crate::common::TEST_MODEL);
    assert_eq!(log.provider_id, crate::common::TEST_PROVIDER);
    assert_eq!(log.fragment_id, outcome.fragment_id);
    assert_eq!(log.text, "It began.");
    assert!(log.messages.iter().any(|b| b.source_tag == "instructions"));
    assert!(log.messages.iter().any(|b| b.source_tag == "input"));
}

// ── Plugin hook behavior ────────────────────────────────────────────────

#[derive(Default)]
struct HookLog {
    before_context: usize,
    before_generation: usize,
    after_generation: usize,
    after_save: Vec<String>,
}

struct TestPlugin {
    name: String,
    log: Arc<Mutex<HookLog>>,
    rewrite_text: Option<String>,
    fail_before_context: bool,
}

impl TestPlugin {
    fn new(name: &str) -> (Arc<Self>, Arc<Mutex<HookLog>>) {
        let log = Arc::new(Mutex::new(HookLog::default()));
        (
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                rewrite_text: None,
                fail_before_context: false,
            }),
            log,
        )
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            "rollDice",
            "Roll narrative dice",
            json!({"type": "object"}),
        )]
    }

    async fn call_tool(
        &self,
        _story_id: &str,
        name: &str,
        _args: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        assert_eq!(name, "rollDice");
        Ok(json!({"roll": 4}))
    }

    async fn before_context(
        &self,
        state: storyloom_core::context::ContextState,
    ) -> anyhow::Result<storyloom_core::context::ContextState> {
        self.log.lock().unwrap().before_context += 1;
        if self.fail_before_context {
            anyhow::bail!("scripted before_context failure");
        }
        Ok(state)
    }

    async fn before_generation(
        &self,
        mut messages: Vec<PromptBlock>,
    ) -> anyhow::Result<Vec<PromptBlock>> {
        self.log.lock().unwrap().before_generation += 1;
        messages.push(PromptBlock::user("Remember the rain.", "plugin-note"));
        Ok(messages)
    }

    async fn after_generation(&self, mut draft: GenerationDraft) -> anyhow::Result<GenerationDraft> {
        self.log.lock().unwrap().after_generation += 1;
        if let Some(text) = &self.rewrite_text {
            draft.text = text.clone();
        }
        Ok(draft)
    }

    async fn after_save(&self, fragment: &Fragment, _story_id: &str) -> anyhow::Result<()> {
        self.log.lock().unwrap().after_save.push(fragment.id.clone());
        Ok(())
    }
}

fn enable_plugin(harness: &TestHarness, name: &str) {
    let mut settings = harness
        .engine
        .stories
        .get(&harness.story_id)
        .unwrap()
        .settings;
    settings.enabled_plugins = vec![name.to_string()];
    harness
        .engine
        .stories
        .update_settings(&harness.story_id, settings)
        .unwrap();
}

#[tokio::test]
async fn hooks_run_in_order_and_mutate_the_call() {
    let client = ScriptedClient::new(vec![text_round(&["It began."])]);
    let (plugin, log) = TestPlugin::new("notes");

    let dir = tempfile::TempDir::new().unwrap();
    let engine = crate::common::engine_builder(&dir)
        .model_client(crate::common::TEST_PROVIDER, client.clone())
        .plugin(plugin)
        .build()
        .unwrap();
    let story = engine.stories.create("Test Story", "").unwrap();
    let harness = TestHarness {
        dir,
        engine,
        story_id: story.id,
    };
    enable_plugin(&harness, "notes");

    let handle = harness
        .engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    let outcome = handle.outcome().await.unwrap();
    let fragment_id = outcome.fragment_id.unwrap();

    // before_generation's extra block reached the model.
    let requests = client.requests.lock().unwrap();
    assert!(requests[0].messages.iter().any(|b| b.source_tag == "plugin-note"));
    // The plugin tool showed up in the advertised merge and the listing.
    assert!(requests[0].tools.iter().any(|t| t.name == "rollDice"));
    assert!(requests[0]
        .messages
        .iter()
        .any(|b| b.source_tag == "tools" && b.content.contains("rollDice")));
    drop(requests);

    // after_save is fire-and-forget; give it a beat.
    for _ in 0..50 {
        if !log.lock().unwrap().after_save.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let log = log.lock().unwrap();
    assert_eq!(log.before_context, 1);
    assert_eq!(log.before_generation, 1);
    assert_eq!(log.after_generation, 1);
    assert_eq!(log.after_save, vec![fragment_id]);
}

#[tokio::test]
async fn after_generation_rewrite_lands_in_the_saved_fragment() {
    let client = ScriptedClient::new(vec![text_round(&["raw text"])]);
    let (mut plugin, _log) = TestPlugin::new("rewriter");
    Arc::get_mut(&mut plugin).unwrap().rewrite_text = Some("polished text".to_string());

    let dir = tempfile::TempDir::new().unwrap();
    let engine = crate::common::engine_builder(&dir)
        .model_client(crate::common::TEST_PROVIDER, client)
        .plugin(plugin)
        .build()
        .unwrap();
    let story = engine.stories.create("Test Story", "").unwrap();
    let harness = TestHarness {
        dir,
        engine,
        story_id: story.id,
    };
    enable_plugin(&harness, "rewriter");

    let mut handle = harness
        .engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap();
    // The byte stream carries the raw model text...
    assert_eq!(handle.collect_text().await, "raw text");
    // ...while the saved fragment carries the rewrite.
    let outcome = handle.outcome().await.unwrap();
    let fragment = harness
        .engine
        .store
        .get(&harness.story_id, &outcome.fragment_id.unwrap())
        .unwrap();
    assert_eq!(fragment.content, "polished text");
}

#[tokio::test]
async fn before_context_failure_aborts_the_request() {
    let client = ScriptedClient::new(vec![text_round(&["never sent"])]);
    let (mut plugin, _log) = TestPlugin::new("bomb");
    Arc::get_mut(&mut plugin).unwrap().fail_before_context = true;

    let dir = tempfile::TempDir::new().unwrap();
    let engine = crate::common::engine_builder(&dir)
        .model_client(crate::common::TEST_PROVIDER, client.clone())
        .plugin(plugin)
        .build()
        .unwrap();
    let story = engine.stories.create("Test Story", "").unwrap();
    let harness = TestHarness {
        dir,
        engine,
        story_id: story.id,
    };
    enable_plugin(&harness, "bomb");

    let err = harness
        .engine
        .generate(generate_request(&harness.story_id, "Scene one."))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Internal(_)));
    assert_eq!(client.request_count(), 0);
}

#[tokio::test]
async fn disabled_plugins_stay_out_of_the_call() {
    let client = ScriptedClient::new(vec![text_round(&["It began."])]);
    let (plugin, log) = TestPlugin::new("dormant");

    let dir = tempfile::TempDir::new().unwrap();
    let engine = crate::common::engine_builder(&dir)
        .model_client(crate::common::TEST_PROVIDER, client.clone())
        .plugin(plugin)
        .build()
        .unwrap();
    let story = engine.stories.create("Test Story", "").unwrap();

    let handle = engine
        .generate(generate_request(&story.id, "Scene one."))
        .await
        .unwrap();
    handle.outcome().await.unwrap();

    assert_eq!(log.lock().unwrap().before_context, 0);
    let requests = client.requests.lock().unwrap();
    assert!(!requests[0].tools.iter().any(|t| t.name == "rollDice"));
}

#[tokio::test]
async fn plugin_tool_handles_its_own_calls() {
    let client = ScriptedClient::new(vec![
        tool_round(&[("call-1", "rollDice", json!({}))]),
        text_round(&["A four."]),
    ]);
    let (plugin, _log) = TestPlugin::new("dice");

    let dir = tempfile::TempDir::new().unwrap();
    let engine = crate::common::engine_builder(&dir)
        .model_client(crate::common::TEST_PROVIDER, client)
        .plugin(plugin)
        .build()
        .unwrap();
    let story = engine.stories.create("Test Story", "").unwrap();
    let harness = TestHarness {
        dir,
        engine,
        story_id: story.id,
    };
    enable_plugin(&harness, "dice");

    let handle = harness
        .engine
        .generate(generate_request(&harness.story_id, "Roll for it."))
        .await
        .unwrap();
    handle.outcome().await.unwrap();

    let logs = harness.engine.logs.list(&harness.story_id).unwrap();
    let call = &logs[0].tool_calls[0];
    assert_eq!(call.name, "rollDice");
    assert_eq!(call.result.as_ref().unwrap()["roll"], 4);
    assert!(!call.is_error);
}
