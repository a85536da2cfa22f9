//! Persistence for librarian analyses, state, and the librarian chat.

use std::sync::Arc;

use storyloom_protocol::{Analysis, LibrarianState, PromptBlock};
use serde::{Deserialize, Serialize};

use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;

/// `librarian/chat.json`: the running conversation with the librarian.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarianChat {
    #[serde(default)]
    pub messages: Vec<PromptBlock>,
}

pub struct AnalysisStore {
    config: Arc<Config>,
}

impl AnalysisStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn paths(&self, story_id: &str) -> StoryPaths {
        StoryPaths::new(&self.config, story_id)
    }

    pub fn save(&self, analysis: &Analysis) -> Result<()> {
        fsutil::write_json(
            &self.paths(&analysis.story_id).analysis(&analysis.id),
            analysis,
        )
    }

    pub fn get(&self, story_id: &str, analysis_id: &str) -> Result<Analysis> {
        fsutil::read_json(&self.paths(story_id).analysis(analysis_id))?
            .ok_or_else(|| CoreError::not_found(format!("analysis {analysis_id}")))
    }

    /// Analyses in creation order, oldest first.
    pub fn list(&self, story_id: &str) -> Result<Vec<Analysis>> {
        let dir = self.paths(story_id).analyses_dir();
        let mut analyses = Vec::new();
        for stem in fsutil::list_json_stems(&dir)? {
            if let Some(analysis) =
                fsutil::read_json::<Analysis>(&dir.join(format!("{stem}.json")))?
            {
                analyses.push(analysis);
            }
        }
        analyses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(analyses)
    }

    pub fn state(&self, story_id: &str) -> Result<LibrarianState> {
        fsutil::read_json_or_default(&self.paths(story_id).librarian_state())
    }

    pub fn save_state(&self, story_id: &str, state: &LibrarianState) -> Result<()> {
        fsutil::write_json(&self.paths(story_id).librarian_state(), state)
    }

    pub fn chat(&self, story_id: &str) -> Result<LibrarianChat> {
        fsutil::read_json_or_default(&self.paths(story_id).librarian_chat())
    }

    pub fn append_chat(&self, story_id: &str, block: PromptBlock) -> Result<LibrarianChat> {
        let mut chat = self.chat(story_id)?;
        chat.messages.push(block);
        fsutil::write_json(&self.paths(story_id).librarian_chat(), &chat)?;
        Ok(chat)
    }
}
