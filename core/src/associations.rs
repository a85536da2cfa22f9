//! Association index: tag→fragments and back-ref lookup.
//!
//! The owning fragment's `tags`/`refs` fields stay authoritative; the two
//! inverted maps are maintained incrementally on every mutation and can be
//! rebuilt wholesale after structural imports. The index is per story and
//! lives in the root branch's content root.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storyloom_protocol::Fragment;

use crate::branches::BranchManager;
use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;
use crate::store::FragmentStore;

/// Persisted shape of `associations.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Associations {
    /// tag → fragment ids (unique per tag).
    #[serde(default)]
    pub tag_index: BTreeMap<String, Vec<String>>,
    /// target id → source ids that reference it.
    #[serde(default)]
    pub ref_index: BTreeMap<String, Vec<String>>,
}

impl Associations {
    fn insert(map: &mut BTreeMap<String, Vec<String>>, key: &str, id: &str) {
        let entry = map.entry(key.to_string()).or_default();
        if !entry.iter().any(|e| e == id) {
            entry.push(id.to_string());
        }
    }

    fn remove(map: &mut BTreeMap<String, Vec<String>>, key: &str, id: &str) {
        if let Some(entry) = map.get_mut(key) {
            entry.retain(|e| e != id);
            if entry.is_empty() {
                map.remove(key);
            }
        }
    }
}

pub struct AssociationIndex {
    config: Arc<Config>,
    branches: Arc<BranchManager>,
}

impl AssociationIndex {
    pub fn new(config: Arc<Config>, branches: Arc<BranchManager>) -> Self {
        Self { config, branches }
    }

    fn index_path(&self, story_id: &str) -> Result<std::path::PathBuf> {
        let root = self.branches.root_branch_id(story_id)?;
        Ok(StoryPaths::new(&self.config, story_id).associations(&root))
    }

    pub fn load(&self, story_id: &str) -> Result<Associations> {
        fsutil::read_json_or_default(&self.index_path(story_id)?)
    }

    fn save(&self, story_id: &str, associations: &Associations) -> Result<()> {
        fsutil::write_json(&self.index_path(story_id)?, associations)
    }

    /// Add a tag to a fragment; lowercased and trimmed, duplicate adds are
    /// no-ops. Returns the updated fragment.
    pub fn add_tag(
        &self,
        story_id: &str,
        store: &FragmentStore,
        fragment_id: &str,
        tag: &str,
    ) -> Result<Fragment> {
        let tag = normalize_tag(tag)?;
        let mut fragment = store.get(story_id, fragment_id)?;
        if fragment.tags.iter().any(|t| *t == tag) {
            return Ok(fragment);
        }
        fragment.tags.push(tag.clone());
        let fragment = store.update(story_id, fragment)?;

        let mut associations = self.load(story_id)?;
        Associations::insert(&mut associations.tag_index, &tag, fragment_id);
        self.save(story_id, &associations)?;
        Ok(fragment)
    }

    pub fn remove_tag(
        &self,
        story_id: &str,
        store: &FragmentStore,
        fragment_id: &str,
        tag: &str,
    ) -> Result<Fragment> {
        let tag = normalize_tag(tag)?;
        let mut fragment = store.get(story_id, fragment_id)?;
        fragment.tags.retain(|t| *t != tag);
        let fragment = store.update(story_id, fragment)?;

        let mut associations = self.load(story_id)?;
        Associations::remove(&mut associations.tag_index, &tag, fragment_id);
        self.save(story_id, &associations)?;
        Ok(fragment)
    }

    /// Add an ordered ref from `source_id` to `target_id`. Refs are
    /// advisory: the target may be missing. Self-refs are rejected.
    pub fn add_ref(
        &self,
        story_id: &str,
        store: &FragmentStore,
        source_id: &str,
        target_id: &str,
    ) -> Result<Fragment> {
        if source_id == target_id {
            return Err(CoreError::InvalidArgument(
                "a fragment cannot reference itself".to_string(),
            ));
        }
        let mut fragment = store.get(story_id, source_id)?;
        if fragment.refs.iter().any(|r| r == target_id) {
            return Ok(fragment);
        }
        fragment.refs.push(target_id.to_string());
        let fragment = store.update(story_id, fragment)?;

        let mut associations = self.load(story_id)?;
        Associations::insert(&mut associations.ref_index, target_id, source_id);
        self.save(story_id, &associations)?;
        Ok(fragment)
    }

    pub fn remove_ref(
        &self,
        story_id: &str,
        store: &FragmentStore,
        source_id: &str,
        target_id: &str,
    ) -> Result<Fragment> {
        let mut fragment = store.get(story_id, source_id)?;
        fragment.refs.retain(|r| r != target_id);
        let fragment = store.update(story_id, fragment)?;

        let mut associations = self.load(story_id)?;
        Associations::remove(&mut associations.ref_index, target_id, source_id);
        self.save(story_id, &associations)?;
        Ok(fragment)
    }

    /// Ids of fragments whose `refs` contain `target_id`.
    pub fn get_back_refs(&self, story_id: &str, target_id: &str) -> Result<Vec<String>> {
        Ok(self
            .load(story_id)?
            .ref_index
            .get(target_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Ids of fragments carrying `tag`.
    pub fn fragments_by_tag(&self, story_id: &str, tag: &str) -> Result<Vec<String>> {
        let tag = normalize_tag(tag)?;
        Ok(self
            .load(story_id)?
            .tag_index
            .get(&tag)
            .cloned()
            .unwrap_or_default())
    }

    /// Rebuild both maps from the fragment listing. Used after structural
    /// imports; archived fragments are indexed too.
    pub fn rebuild(&self, story_id: &str, store: &FragmentStore) -> Result<Associations> {
        let fragments = store.list(story_id, None, true)?;
        let mut associations = Associations::default();
        for fragment in &fragments {
            for tag in &fragment.tags {
                Associations::insert(&mut associations.tag_index, tag, &fragment.id);
            }
            for target in &fragment.refs {
                Associations::insert(&mut associations.ref_index, target, &fragment.id);
            }
        }
        self.save(story_id, &associations)?;
        Ok(associations)
    }
}

fn normalize_tag(tag: &str) -> Result<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        return Err(CoreError::InvalidArgument("tag is empty".to_string()));
    }
    Ok(tag)
}
