//! Write-guard scenarios driven through the full generation pipeline.

use pretty_assertions::assert_eq;
use serde_json::json;
use storyloom_core::generation::GenerateRequest;
use storyloom_protocol::fragment::meta_keys;
use storyloom_protocol::{Fragment, FragmentType, GenerationMode};

use crate::common::{ScriptedClient, harness_with_client, text_round, tool_round};

fn request(story_id: &str) -> GenerateRequest {
    GenerateRequest {
        story_id: story_id.to_string(),
        input: "Continue.".to_string(),
        mode: GenerationMode::Generate,
        fragment_id: None,
        save_result: true,
    }
}

#[tokio::test]
async fn locked_fragment_rejects_tool_patch() {
    // Seed the locked fragment first; the scripted tool call needs its id.
    let harness = harness_with_client(ScriptedClient::new(vec![]));
    let mut locked = Fragment::new(FragmentType::Character, "Alice").with_content("Alice is tall.");
    locked.meta.insert(meta_keys::LOCKED.to_string(), json!(true));
    let locked = harness
        .engine
        .store
        .create(&harness.story_id, locked)
        .unwrap();

    let client = ScriptedClient::new(vec![
        tool_round(&[(
            "call-1",
            "patchFragment",
            json!({"id": locked.id, "old_text": "tall", "new_text": "short"}),
        )]),
        text_round(&["Moving on."]),
    ]);
    let engine = crate::common::engine_builder(&harness.dir)
        .model_client(crate::common::TEST_PROVIDER, client)
        .build()
        .unwrap();

    let handle = engine.generate(request(&harness.story_id)).await.unwrap();
    handle.outcome().await.unwrap();

    // The tool result is a structured Protected error...
    let logs = engine.logs.list(&harness.story_id).unwrap();
    let call = &logs[0].tool_calls[0];
    assert!(call.is_error);
    assert_eq!(call.result.as_ref().unwrap()["error"]["code"], "Protected");

    // ...and the fragment is untouched, version included.
    let unchanged = engine.store.get(&harness.story_id, &locked.id).unwrap();
    assert_eq!(unchanged.content, "Alice is tall.");
    assert_eq!(unchanged.version, 1);
}

#[tokio::test]
async fn frozen_section_survives_tool_updates() {
    let harness = harness_with_client(ScriptedClient::new(vec![]));
    let engine = &harness.engine;
    let mut guarded = Fragment::new(FragmentType::Guideline, "Rules")
        .with_content("Always {PHRASE}. Maybe other.");
    guarded.meta.insert(
        meta_keys::FROZEN_SECTIONS.to_string(),
        json!([{"id": "f1", "text": "Always {PHRASE}."}]),
    );
    let guarded = engine.store.create(&harness.story_id, guarded).unwrap();

    let client = ScriptedClient::new(vec![
        tool_round(&[
            (
                "call-reject",
                "updateFragment",
                json!({"id": guarded.id, "content": "Now {PHRASE}. Maybe other."}),
            ),
            (
                "call-accept",
                "updateFragment",
                json!({"id": guarded.id, "content": "Always {PHRASE}. A new tail."}),
            ),
        ]),
        text_round(&["Done."]),
    ]);
    let engine = crate::common::engine_builder(&harness.dir)
        .model_client(crate::common::TEST_PROVIDER, client)
        .build()
        .unwrap();

    let handle = engine.generate(request(&harness.story_id)).await.unwrap();
    handle.outcome().await.unwrap();

    let logs = engine.logs.list(&harness.story_id).unwrap();
    let calls = &logs[0].tool_calls;
    assert_eq!(calls.len(), 2);
    assert!(calls[0].is_error);
    assert_eq!(calls[0].result.as_ref().unwrap()["error"]["code"], "Protected");
    assert!(!calls[1].is_error);

    let updated = engine.store.get(&harness.story_id, &guarded.id).unwrap();
    assert_eq!(updated.content, "Always {PHRASE}. A new tail.");
    assert_eq!(updated.version, 2);
    // Every stored content still carries the frozen text.
    for section in updated.frozen_sections() {
        assert!(updated.content.contains(&section.text));
    }
}

#[tokio::test]
async fn generated_tools_share_the_request_scope() {
    // A tool-created fragment is visible to a second tool call in the same
    // generation (same story, same branch).
    let harness = harness_with_client(ScriptedClient::new(vec![]));
    let client = ScriptedClient::new(vec![
        tool_round(&[(
            "call-1",
            "createFragment",
            json!({"type": "knowledge", "name": "The Pact", "content": "Binding."}),
        )]),
        tool_round(&[(
            "call-2",
            "searchFragmentsByType",
            json!({"type": "knowledge"}),
        )]),
        text_round(&["Recorded."]),
    ]);
    let engine = crate::common::engine_builder(&harness.dir)
        .model_client(crate::common::TEST_PROVIDER, client)
        .build()
        .unwrap();

    let handle = engine.generate(request(&harness.story_id)).await.unwrap();
    handle.outcome().await.unwrap();

    let logs = engine.logs.list(&harness.story_id).unwrap();
    let search = &logs[0].tool_calls[1];
    let found = search.result.as_ref().unwrap()["fragments"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "The Pact");
}
