//! Append-only generation log store.

use std::sync::Arc;

use storyloom_protocol::GenerationLog;

use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;

pub struct GenerationLogStore {
    config: Arc<Config>,
}

impl GenerationLogStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn paths(&self, story_id: &str) -> StoryPaths {
        StoryPaths::new(&self.config, story_id)
    }

    /// Append one record. The id must be fresh; logs are never rewritten.
    pub fn append(&self, log: &GenerationLog) -> Result<()> {
        let path = self.paths(&log.story_id).generation_log(&log.id);
        if path.exists() {
            return Err(CoreError::Conflict(format!("log {} already exists", log.id)));
        }
        fsutil::write_json(&path, log)
    }

    /// Best-effort append: a failed log write never fails the save that
    /// produced it.
    pub fn append_best_effort(&self, log: &GenerationLog) -> Option<String> {
        match self.append(log) {
            Ok(()) => Some(log.id.clone()),
            Err(err) => {
                tracing::warn!(story_id = %log.story_id, log_id = %log.id, %err, "generation log write failed");
                None
            }
        }
    }

    /// All records of a story, newest first.
    pub fn list(&self, story_id: &str) -> Result<Vec<GenerationLog>> {
        let dir = self.paths(story_id).generation_logs_dir();
        let mut logs = Vec::new();
        for stem in fsutil::list_json_stems(&dir)? {
            if let Some(log) =
                fsutil::read_json::<GenerationLog>(&dir.join(format!("{stem}.json")))?
            {
                logs.push(log);
            }
        }
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    pub fn get(&self, story_id: &str, log_id: &str) -> Result<GenerationLog> {
        fsutil::read_json(&self.paths(story_id).generation_log(log_id))?
            .ok_or_else(|| CoreError::not_found(format!("generation log {log_id}")))
    }
}
