//! Fragment store: canonical CRUD with atomic file semantics.
//!
//! Writes land on the active branch's overlay via `write(tmp) → rename`;
//! reads resolve through the branch chain. Versioned updates snapshot the
//! pre-state into `versions` before applying; `update_meta` is the
//! version-exempt channel for machine-written meta.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use storyloom_protocol::{Fragment, FragmentSnapshot, FragmentType};

use crate::branches::BranchManager;
use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;

/// Maximum fragment description length.
const MAX_DESCRIPTION_LEN: usize = 250;

/// Store knobs left tunable by the product.
#[derive(Debug, Clone)]
pub struct StoreTuning {
    /// Cap on `versions` history; oldest snapshots are dropped first.
    pub max_versions: usize,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self { max_versions: 64 }
    }
}

/// Partial field update consumed by `update_versioned`.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

impl FieldPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

pub struct FragmentStore {
    config: Arc<Config>,
    branches: Arc<BranchManager>,
    tuning: StoreTuning,
}

impl FragmentStore {
    pub fn new(config: Arc<Config>, branches: Arc<BranchManager>, tuning: StoreTuning) -> Self {
        Self {
            config,
            branches,
            tuning,
        }
    }

    fn paths(&self, story_id: &str) -> StoryPaths {
        StoryPaths::new(&self.config, story_id)
    }

    fn validate(fragment: &Fragment) -> Result<()> {
        if fragment.name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("fragment name is empty".to_string()));
        }
        if fragment.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::InvalidArgument(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        let expected = format!("{}-", fragment.kind.prefix());
        if !fragment.id.starts_with(&expected) {
            return Err(CoreError::InvalidArgument(format!(
                "id {} does not carry the {} prefix",
                fragment.id,
                fragment.kind.prefix()
            )));
        }
        Ok(())
    }

    /// Create on the active branch. Fails with `Conflict` when the id
    /// resolves anywhere on the branch chain.
    pub fn create(&self, story_id: &str, mut fragment: Fragment) -> Result<Fragment> {
        Self::validate(&fragment)?;
        if self
            .branches
            .resolve_fragment(story_id, &fragment.id)?
            .is_some()
        {
            return Err(CoreError::Conflict(format!(
                "fragment {} already exists",
                fragment.id
            )));
        }
        fragment.normalize_tags();
        if fragment.version == 0 {
            fragment.version = 1;
        }
        let active = self.branches.active_branch_id(story_id)?;
        let paths = self.paths(story_id);
        // A tombstone from an earlier delete no longer applies.
        let tomb = paths.tombstone(&active, &fragment.id);
        if tomb.exists() {
            std::fs::remove_file(&tomb)?;
        }
        fsutil::write_json(&paths.fragment(&active, &fragment.id), &fragment)?;
        tracing::debug!(story_id, fragment_id = %fragment.id, "created fragment");
        Ok(fragment)
    }

    /// Resolve through the branch chain; `NotFound` when absent or
    /// tombstoned.
    pub fn get(&self, story_id: &str, fragment_id: &str) -> Result<Fragment> {
        self.branches
            .resolve_fragment(story_id, fragment_id)?
            .map(|(fragment, _)| fragment)
            .ok_or_else(|| CoreError::not_found(format!("fragment {fragment_id}")))
    }

    /// Union of the active branch's overlay and inherited ids, minus
    /// tombstoned ones, filtered by the type's id prefix.
    pub fn list(
        &self,
        story_id: &str,
        type_filter: Option<&FragmentType>,
        include_archived: bool,
    ) -> Result<Vec<Fragment>> {
        let state = self.branches.state(story_id)?;
        let paths = self.paths(story_id);
        let prefix = type_filter.map(|t| format!("{}-", t.prefix()));

        let mut seen: HashSet<String> = HashSet::new();
        let mut hidden: HashSet<String> = HashSet::new();
        let mut fragments = Vec::new();
        for branch in state.ancestry(&state.active_branch_id) {
            let dir = paths.fragments_dir(&branch.id);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                let path = entry?.path();
                let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string())
                else {
                    continue;
                };
                if stem.starts_with('.') {
                    continue;
                }
                match path.extension().and_then(|e| e.to_str()) {
                    Some("tomb") => {
                        if !seen.contains(&stem) {
                            hidden.insert(stem);
                        }
                    }
                    Some("json") => {
                        if seen.contains(&stem) || hidden.contains(&stem) {
                            continue;
                        }
                        if let Some(prefix) = &prefix
                            && !stem.starts_with(prefix)
                        {
                            continue;
                        }
                        if let Some(fragment) = fsutil::read_json::<Fragment>(&path)? {
                            seen.insert(stem);
                            fragments.push(fragment);
                        }
                    }
                    _ => {}
                }
            }
        }
        if !include_archived {
            fragments.retain(|f| !f.archived);
        }
        fragments.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(fragments)
    }

    /// Full-record write to the active branch's overlay. Version semantics
    /// are the caller's business; use `update_versioned` for the snapshot
    /// discipline.
    pub fn update(&self, story_id: &str, mut fragment: Fragment) -> Result<Fragment> {
        Self::validate(&fragment)?;
        if self
            .branches
            .resolve_fragment(story_id, &fragment.id)?
            .is_none()
        {
            return Err(CoreError::not_found(format!("fragment {}", fragment.id)));
        }
        fragment.normalize_tags();
        fragment.updated_at = Utc::now();
        self.write_to_active(story_id, &fragment)?;
        Ok(fragment)
    }

    /// Snapshot-then-apply update of name/description/content. A no-change
    /// patch is a plain touch.
    pub fn update_versioned(
        &self,
        story_id: &str,
        fragment_id: &str,
        patch: FieldPatch,
        reason: Option<String>,
    ) -> Result<Fragment> {
        let mut fragment = self.get(story_id, fragment_id)?;
        let changed = patch.name.as_ref().is_some_and(|v| *v != fragment.name)
            || patch
                .description
                .as_ref()
                .is_some_and(|v| *v != fragment.description)
            || patch.content.as_ref().is_some_and(|v| *v != fragment.content);
        if changed {
            self.push_snapshot(&mut fragment, reason);
            if let Some(name) = patch.name {
                fragment.name = name;
            }
            if let Some(description) = patch.description {
                fragment.description = description;
            }
            if let Some(content) = patch.content {
                fragment.content = content;
            }
            fragment.version += 1;
        }
        Self::validate(&fragment)?;
        fragment.updated_at = Utc::now();
        self.write_to_active(story_id, &fragment)?;
        Ok(fragment)
    }

    /// Revert name/description/content to a prior snapshot (latest when
    /// `version` is omitted), recording the revert as a new version.
    pub fn revert_to_version(
        &self,
        story_id: &str,
        fragment_id: &str,
        version: Option<u64>,
    ) -> Result<Fragment> {
        let mut fragment = self.get(story_id, fragment_id)?;
        let target = match version {
            Some(v) => fragment
                .versions
                .iter()
                .find(|s| s.version == v)
                .cloned()
                .ok_or_else(|| {
                    CoreError::not_found(format!("version {v} of fragment {fragment_id}"))
                })?,
            None => fragment
                .versions
                .last()
                .cloned()
                .ok_or_else(|| {
                    CoreError::not_found(format!("fragment {fragment_id} has no versions"))
                })?,
        };
        self.push_snapshot(&mut fragment, Some(format!("revert-to-{}", target.version)));
        fragment.name = target.name;
        fragment.description = target.description;
        fragment.content = target.content;
        fragment.version += 1;
        fragment.updated_at = Utc::now();
        self.write_to_active(story_id, &fragment)?;
        Ok(fragment)
    }

    pub fn archive(&self, story_id: &str, fragment_id: &str) -> Result<Fragment> {
        self.set_archived(story_id, fragment_id, true)
    }

    pub fn restore(&self, story_id: &str, fragment_id: &str) -> Result<Fragment> {
        self.set_archived(story_id, fragment_id, false)
    }

    fn set_archived(&self, story_id: &str, fragment_id: &str, archived: bool) -> Result<Fragment> {
        let mut fragment = self.get(story_id, fragment_id)?;
        fragment.archived = archived;
        fragment.updated_at = Utc::now();
        self.write_to_active(story_id, &fragment)?;
        Ok(fragment)
    }

    /// Hard delete. Requires a prior archive; tombstones the id on the
    /// active branch when the fragment is inherited from an ancestor.
    pub fn delete(&self, story_id: &str, fragment_id: &str) -> Result<()> {
        let (fragment, found_on) = self
            .branches
            .resolve_fragment(story_id, fragment_id)?
            .ok_or_else(|| CoreError::not_found(format!("fragment {fragment_id}")))?;
        if !fragment.archived {
            return Err(CoreError::Conflict(format!(
                "fragment {fragment_id} must be archived before delete"
            )));
        }
        let active = self.branches.active_branch_id(story_id)?;
        let paths = self.paths(story_id);
        let overlay = paths.fragment(&active, fragment_id);
        if overlay.exists() {
            std::fs::remove_file(&overlay)?;
        }
        if found_on != active || self.resolves_from_ancestor(story_id, &active, fragment_id)? {
            fsutil::atomic_write(&paths.tombstone(&active, fragment_id), b"")?;
        }
        tracing::debug!(story_id, fragment_id, "deleted fragment");
        Ok(())
    }

    fn resolves_from_ancestor(
        &self,
        story_id: &str,
        active: &str,
        fragment_id: &str,
    ) -> Result<bool> {
        let state = self.branches.state(story_id)?;
        let paths = self.paths(story_id);
        for branch in state.ancestry(active).into_iter().skip(1) {
            if paths.tombstone(&branch.id, fragment_id).exists() {
                return Ok(false);
            }
            if paths.fragment(&branch.id, fragment_id).exists() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Version-exempt meta write: the machine channel used for librarian
    /// annotations and similar bookkeeping.
    pub fn update_meta(
        &self,
        story_id: &str,
        fragment_id: &str,
        key: &str,
        value: Value,
    ) -> Result<Fragment> {
        let mut fragment = self.get(story_id, fragment_id)?;
        fragment.meta.insert(key.to_string(), value);
        fragment.updated_at = Utc::now();
        self.write_to_active(story_id, &fragment)?;
        Ok(fragment)
    }

    pub fn list_versions(&self, story_id: &str, fragment_id: &str) -> Result<Vec<FragmentSnapshot>> {
        Ok(self.get(story_id, fragment_id)?.versions)
    }

    fn push_snapshot(&self, fragment: &mut Fragment, reason: Option<String>) {
        fragment.versions.push(FragmentSnapshot {
            version: fragment.version,
            name: fragment.name.clone(),
            description: fragment.description.clone(),
            content: fragment.content.clone(),
            created_at: Utc::now(),
            reason,
        });
        if fragment.versions.len() > self.tuning.max_versions {
            let excess = fragment.versions.len() - self.tuning.max_versions;
            fragment.versions.drain(..excess);
        }
    }

    fn write_to_active(&self, story_id: &str, fragment: &Fragment) -> Result<()> {
        let active = self.branches.active_branch_id(story_id)?;
        let paths = self.paths(story_id);
        fsutil::write_json(&paths.fragment(&active, &fragment.id), fragment)
    }
}
