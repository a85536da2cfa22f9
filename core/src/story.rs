//! Story container CRUD.
//!
//! A story is a directory under `stories/<storyId>/` holding `meta.json`,
//! `branches.json`, per-branch content, librarian state, and generation
//! logs. Creating a story bootstraps the root branch whose content
//! directory is the base of every overlay.

use std::sync::Arc;

use chrono::Utc;
use storyloom_protocol::{Branch, BranchState, StoryMeta, StorySettings};

use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;

/// Partial update of the human metadata.
#[derive(Debug, Clone, Default)]
pub struct StoryUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
}

pub struct StoryStore {
    config: Arc<Config>,
}

impl StoryStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn paths(&self, story_id: &str) -> StoryPaths {
        StoryPaths::new(&self.config, story_id)
    }

    /// Create a story with its root branch and an empty prose chain.
    pub fn create(&self, name: &str, description: &str) -> Result<StoryMeta> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("story name is empty".to_string()));
        }
        let mut meta = StoryMeta::new(name.trim());
        meta.description = description.to_string();

        let root = Branch::root("main");
        let state = BranchState {
            active_branch_id: root.id.clone(),
            branches: vec![root.clone()],
        };

        let paths = self.paths(&meta.id);
        fsutil::write_json(&paths.meta(), &meta)?;
        fsutil::write_json(&paths.branches(), &state)?;
        fsutil::write_json::<Vec<storyloom_protocol::ChainSection>>(
            &paths.chain(&root.id),
            &Vec::new(),
        )?;
        tracing::debug!(story_id = %meta.id, branch_id = %root.id, "created story");
        Ok(meta)
    }

    pub fn get(&self, story_id: &str) -> Result<StoryMeta> {
        fsutil::read_json(&self.paths(story_id).meta())?
            .ok_or_else(|| CoreError::not_found(format!("story {story_id}")))
    }

    /// All stories, newest first.
    pub fn list(&self) -> Result<Vec<StoryMeta>> {
        let dir = self.config.stories_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut stories = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(meta) =
                    fsutil::read_json::<StoryMeta>(&entry.path().join("meta.json"))?
            {
                stories.push(meta);
            }
        }
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stories)
    }

    pub fn update(&self, story_id: &str, update: StoryUpdate) -> Result<StoryMeta> {
        let mut meta = self.get(story_id)?;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidArgument("story name is empty".to_string()));
            }
            meta.name = name;
        }
        if let Some(description) = update.description {
            meta.description = description;
        }
        if let Some(summary) = update.summary {
            meta.summary = summary;
        }
        meta.updated_at = Utc::now();
        fsutil::write_json(&self.paths(story_id).meta(), &meta)?;
        Ok(meta)
    }

    pub fn update_settings(&self, story_id: &str, settings: StorySettings) -> Result<StoryMeta> {
        let mut meta = self.get(story_id)?;
        meta.settings = settings;
        meta.updated_at = Utc::now();
        fsutil::write_json(&self.paths(story_id).meta(), &meta)?;
        Ok(meta)
    }

    /// Cascading delete of the whole story directory.
    pub fn delete(&self, story_id: &str) -> Result<()> {
        let root = self.paths(story_id).root().to_path_buf();
        if !root.exists() {
            return Err(CoreError::not_found(format!("story {story_id}")));
        }
        std::fs::remove_dir_all(&root)?;
        tracing::debug!(story_id, "deleted story");
        Ok(())
    }
}
