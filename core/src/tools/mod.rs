//! Fragment tools: the fixed toolset every generation advertises.
//!
//! Mutating tools run under the story write lock and through the write
//! guard. Tool failures never abort the stream; they come back as
//! structured error objects (`{"error": {"code", "message"}}`) so the model
//! can react.

pub mod guard;

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use storyloom_protocol::fragment::meta_keys;
use storyloom_protocol::{Fragment, FragmentType, ToolSpec};

use crate::associations::AssociationIndex;
use crate::error::{CoreError, Result};
use crate::locks::StoryLocks;
use crate::store::{FieldPatch, FragmentStore};

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchByTagArgs {
    /// Tag to look up (case-insensitive).
    tag: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchByTypeArgs {
    /// Fragment type name (prose, character, guideline, knowledge, ...).
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetFragmentArgs {
    id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateFragmentArgs {
    /// Fragment type name.
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    refs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateFragmentArgs {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PatchFragmentArgs {
    id: String,
    /// Exact text to replace (first occurrence).
    old_text: String,
    new_text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TagArgs {
    id: String,
    tag: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddRefArgs {
    /// Source fragment carrying the reference.
    id: String,
    /// Target fragment being referenced.
    ref_id: String,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({"type": "object"}))
}

/// The built-in toolset, scoped to one story/branch per invocation.
pub struct FragmentTools {
    store: Arc<FragmentStore>,
    associations: Arc<AssociationIndex>,
    locks: Arc<StoryLocks>,
}

impl FragmentTools {
    pub fn new(
        store: Arc<FragmentStore>,
        associations: Arc<AssociationIndex>,
        locks: Arc<StoryLocks>,
    ) -> Self {
        Self {
            store,
            associations,
            locks,
        }
    }

    /// Tool advertisements, stable order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "searchFragmentsByTag",
                "Find fragments carrying a tag.",
                schema_of::<SearchByTagArgs>(),
            ),
            ToolSpec::new(
                "searchFragmentsByType",
                "List fragments of one type.",
                schema_of::<SearchByTypeArgs>(),
            ),
            ToolSpec::new(
                "getFragment",
                "Read one fragment in full.",
                schema_of::<GetFragmentArgs>(),
            ),
            ToolSpec::new(
                "createFragment",
                "Create a new fragment.",
                schema_of::<CreateFragmentArgs>(),
            ),
            ToolSpec::new(
                "updateFragment",
                "Update a fragment's name, description, or content.",
                schema_of::<UpdateFragmentArgs>(),
            ),
            ToolSpec::new(
                "patchFragment",
                "Replace one exact text occurrence inside a fragment's content.",
                schema_of::<PatchFragmentArgs>(),
            ),
            ToolSpec::new("addTag", "Add a tag to a fragment.", schema_of::<TagArgs>()),
            ToolSpec::new(
                "removeTag",
                "Remove a tag from a fragment.",
                schema_of::<TagArgs>(),
            ),
            ToolSpec::new(
                "addRef",
                "Add a reference from one fragment to another.",
                schema_of::<AddRefArgs>(),
            ),
        ]
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.specs().iter().any(|s| s.name == name)
    }

    /// Invoke a tool by name. Errors become structured result objects.
    pub async fn invoke(&self, story_id: &str, name: &str, args: Value) -> Value {
        match self.dispatch(story_id, name, args).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(story_id, tool = name, code = err.code(), "tool call rejected");
                json!({"error": {"code": err.code(), "message": err.to_string()}})
            }
        }
    }

    async fn dispatch(&self, story_id: &str, name: &str, args: Value) -> Result<Value> {
        match name {
            "searchFragmentsByTag" => {
                let args: SearchByTagArgs = parse(args)?;
                let ids = self.associations.fragments_by_tag(story_id, &args.tag)?;
                let mut matches = Vec::new();
                for id in ids {
                    if let Ok(fragment) = self.store.get(story_id, &id) {
                        matches.push(summary(&fragment));
                    }
                }
                Ok(json!({"fragments": matches}))
            }
            "searchFragmentsByType" => {
                let args: SearchByTypeArgs = parse(args)?;
                let kind = FragmentType::parse(&args.kind);
                let fragments = self.store.list(story_id, Some(&kind), false)?;
                Ok(json!({
                    "fragments": fragments.iter().map(summary).collect::<Vec<_>>()
                }))
            }
            "getFragment" => {
                let args: GetFragmentArgs = parse(args)?;
                let fragment = self.store.get(story_id, &args.id)?;
                Ok(serde_json::to_value(&fragment)?)
            }
            "createFragment" => {
                let args: CreateFragmentArgs = parse(args)?;
                let lock = self.locks.for_story(story_id);
                let _guard = lock.lock().await;
                let mut fragment =
                    Fragment::new(FragmentType::parse(&args.kind), args.name);
                fragment.description = args.description.unwrap_or_default();
                fragment.content = args.content.unwrap_or_default();
                fragment.tags = args.tags.unwrap_or_default();
                fragment.refs = args.refs.unwrap_or_default();
                fragment
                    .meta
                    .insert(meta_keys::SOURCE.to_string(), json!("ai"));
                let created = self.store.create(story_id, fragment)?;
                Ok(json!({"id": created.id, "created": true}))
            }
            "updateFragment" => {
                let args: UpdateFragmentArgs = parse(args)?;
                let lock = self.locks.for_story(story_id);
                let _guard = lock.lock().await;
                let fragment = self.store.get(story_id, &args.id)?;
                guard::check_write(&fragment, args.content.as_deref())?;
                let previous_content = fragment.content.clone();
                let updated = self.store.update_versioned(
                    story_id,
                    &args.id,
                    FieldPatch {
                        name: args.name,
                        description: args.description,
                        content: args.content,
                    },
                    Some("ai-edit".to_string()),
                )?;
                self.store.update_meta(
                    story_id,
                    &args.id,
                    meta_keys::PREVIOUS_CONTENT,
                    json!(previous_content),
                )?;
                Ok(json!({"id": updated.id, "version": updated.version}))
            }
            "patchFragment" => {
                let args: PatchFragmentArgs = parse(args)?;
                let lock = self.locks.for_story(story_id);
                let _guard = lock.lock().await;
                let fragment = self.store.get(story_id, &args.id)?;
                if !fragment.content.contains(&args.old_text) {
                    return Err(CoreError::InvalidArgument(format!(
                        "text to replace not found in fragment {}",
                        args.id
                    )));
                }
                let new_content = fragment.content.replacen(&args.old_text, &args.new_text, 1);
                guard::check_write(&fragment, Some(&new_content))?;
                let previous_content = fragment.content.clone();
                let updated = self.store.update_versioned(
                    story_id,
                    &args.id,
                    FieldPatch::content(new_content),
                    Some("ai-patch".to_string()),
                )?;
                self.store.update_meta(
                    story_id,
                    &args.id,
                    meta_keys::PREVIOUS_CONTENT,
                    json!(previous_content),
                )?;
                Ok(json!({"id": updated.id, "version": updated.version}))
            }
            "addTag" => {
                let args: TagArgs = parse(args)?;
                let lock = self.locks.for_story(story_id);
                let _guard = lock.lock().await;
                let fragment = self.store.get(story_id, &args.id)?;
                guard::ensure_unlocked(&fragment)?;
                let updated =
                    self.associations
                        .add_tag(story_id, &self.store, &args.id, &args.tag)?;
                Ok(json!({"id": updated.id, "tags": updated.tags}))
            }
            "removeTag" => {
                let args: TagArgs = parse(args)?;
                let lock = self.locks.for_story(story_id);
                let _guard = lock.lock().await;
                let fragment = self.store.get(story_id, &args.id)?;
                guard::ensure_unlocked(&fragment)?;
                let updated =
                    self.associations
                        .remove_tag(story_id, &self.store, &args.id, &args.tag)?;
                Ok(json!({"id": updated.id, "tags": updated.tags}))
            }
            "addRef" => {
                let args: AddRefArgs = parse(args)?;
                let lock = self.locks.for_story(story_id);
                let _guard = lock.lock().await;
                let fragment = self.store.get(story_id, &args.id)?;
                guard::ensure_unlocked(&fragment)?;
                let updated =
                    self.associations
                        .add_ref(story_id, &self.store, &args.id, &args.ref_id)?;
                Ok(json!({"id": updated.id, "refs": updated.refs}))
            }
            other => Err(CoreError::not_found(format!("tool {other}"))),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|err| CoreError::InvalidArgument(format!("bad tool arguments: {err}")))
}

fn summary(fragment: &Fragment) -> Value {
    json!({
        "id": fragment.id,
        "type": fragment.kind.name(),
        "name": fragment.name,
        "description": fragment.description,
    })
}
