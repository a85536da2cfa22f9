//! The fragment: storyloom's universal content unit.
//!
//! Everything a story accumulates (prose passages, characters, guidelines,
//! knowledge entries, images, chapter markers) is a fragment. Fragments are
//! persisted one-per-file as pretty JSON with camelCase keys; every field
//! that later versions may add is `#[serde(default)]` so old files keep
//! loading.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Well-known `meta` keys the core reads or writes. Plugins may add their
/// own keys; these are the ones with engine semantics.
pub mod meta_keys {
    /// Boolean. A locked fragment rejects all tool-driven writes.
    pub const LOCKED: &str = "locked";
    /// List of `{id, text}`. Each `text` must survive every tool write.
    pub const FROZEN_SECTIONS: &str = "frozenSections";
    /// The user input that produced a generated prose fragment.
    pub const GENERATED_FROM: &str = "generatedFrom";
    /// `generate` | `regenerate` | `refine`.
    pub const GENERATION_MODE: &str = "generationMode";
    /// Source fragment of a regenerate/refine call.
    pub const PREVIOUS_FRAGMENT_ID: &str = "previousFragmentId";
    /// Section sibling this fragment is an alternate take of.
    pub const VARIATION_OF: &str = "variationOf";
    /// Image fragment ids referenced by a prose passage.
    pub const VISUAL_REFS: &str = "visualRefs";
    /// Librarian annotation channel. Writes here never bump `version`.
    pub const ANNOTATIONS: &str = "annotations";
    /// Who created the fragment (`librarian`, plugin name, ...).
    pub const SOURCE: &str = "source";
    /// Analysis a librarian-created fragment came from.
    pub const ANALYSIS_ID: &str = "analysisId";
    /// Index into the analysis' suggestion list.
    pub const SUGGESTION_INDEX: &str = "suggestionIndex";
    /// Pre-edit content kept for one-step undo.
    pub const PREVIOUS_CONTENT: &str = "previousContent";
}

/// Closed set of core fragment types plus an escape hatch for
/// plugin-defined types. Serialized as the bare type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentType {
    Prose,
    Character,
    Guideline,
    Knowledge,
    Image,
    Icon,
    Marker,
    Other(String),
}

impl FragmentType {
    /// Id prefix for this type (`pr`, `ch`, ...). Plugin types use their
    /// lowercased name as prefix.
    pub fn prefix(&self) -> &str {
        match self {
            FragmentType::Prose => "pr",
            FragmentType::Character => "ch",
            FragmentType::Guideline => "gl",
            FragmentType::Knowledge => "kn",
            FragmentType::Image => "im",
            FragmentType::Icon => "ic",
            FragmentType::Marker => "mk",
            FragmentType::Other(name) => name,
        }
    }

    /// Canonical type name (`prose`, `character`, ...).
    pub fn name(&self) -> &str {
        match self {
            FragmentType::Prose => "prose",
            FragmentType::Character => "character",
            FragmentType::Guideline => "guideline",
            FragmentType::Knowledge => "knowledge",
            FragmentType::Image => "image",
            FragmentType::Icon => "icon",
            FragmentType::Marker => "marker",
            FragmentType::Other(name) => name,
        }
    }

    pub fn parse(name: &str) -> FragmentType {
        match name {
            "prose" => FragmentType::Prose,
            "character" => FragmentType::Character,
            "guideline" => FragmentType::Guideline,
            "knowledge" => FragmentType::Knowledge,
            "image" => FragmentType::Image,
            "icon" => FragmentType::Icon,
            "marker" => FragmentType::Marker,
            other => FragmentType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FragmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for FragmentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FragmentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(FragmentType::parse(&name))
    }
}

/// Where a sticky fragment lands in the assembled message list.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Placement {
    System,
    #[default]
    User,
}

/// One entry of `meta.frozenSections`: a substring AI writers must preserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FrozenSection {
    pub id: String,
    pub text: String,
}

/// A snapshot of the mutable fields, pushed before every versioned change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentSnapshot {
    pub version: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn default_version() -> u64 {
    1
}

/// The universal content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FragmentType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub archived: bool,
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub versions: Vec<FragmentSnapshot>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fragment {
    /// New fragment with a freshly generated id and current timestamps.
    pub fn new(kind: FragmentType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: crate::ids::fragment_id(&kind),
            kind,
            name: name.into(),
            description: String::new(),
            content: String::new(),
            tags: Vec::new(),
            refs: Vec::new(),
            sticky: false,
            placement: Placement::User,
            order: 0,
            archived: false,
            version: 1,
            versions: Vec::new(),
            meta: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// True when `meta.locked` is set.
    pub fn is_locked(&self) -> bool {
        self.meta
            .get(meta_keys::LOCKED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Parsed `meta.frozenSections`, empty when absent or malformed.
    pub fn frozen_sections(&self) -> Vec<FrozenSection> {
        self.meta
            .get(meta_keys::FROZEN_SECTIONS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// String meta accessor for the well-known keys.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    /// Normalized tag set: lowercased, trimmed, deduped, empty dropped.
    pub fn normalize_tags(&mut self) {
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && seen.insert(tag.clone()) {
                out.push(tag);
            }
        }
        self.tags = out;
    }
}
