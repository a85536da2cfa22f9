//! Branch manager: named copy-on-write overlays over a base content root.
//!
//! Each branch owns `content/<branchId>/`. Reads resolve leaf→root along
//! the parent chain and stop at a tombstone; writes always land on the
//! active branch (copy-up happens implicitly because the whole fragment is
//! rewritten there). Forking copies the parent's prose chain truncated at
//! the fork point; fragments are not copied until first mutation.

use std::path::PathBuf;
use std::sync::Arc;

use storyloom_protocol::{Branch, BranchState, ChainSection, Fragment};

use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;

pub struct BranchManager {
    config: Arc<Config>,
}

impl BranchManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn paths(&self, story_id: &str) -> StoryPaths {
        StoryPaths::new(&self.config, story_id)
    }

    /// Persisted branch state; `NotFound` when the story does not exist.
    pub fn state(&self, story_id: &str) -> Result<BranchState> {
        fsutil::read_json(&self.paths(story_id).branches())?
            .ok_or_else(|| CoreError::not_found(format!("story {story_id}")))
    }

    fn save_state(&self, story_id: &str, state: &BranchState) -> Result<()> {
        fsutil::write_json(&self.paths(story_id).branches(), state)
    }

    pub fn list_branches(&self, story_id: &str) -> Result<Vec<Branch>> {
        Ok(self.state(story_id)?.branches)
    }

    pub fn active_branch_id(&self, story_id: &str) -> Result<String> {
        Ok(self.state(story_id)?.active_branch_id)
    }

    /// The root branch id (the base content root).
    pub fn root_branch_id(&self, story_id: &str) -> Result<String> {
        let state = self.state(story_id)?;
        state
            .branches
            .iter()
            .find(|b| b.parent_id.is_none())
            .map(|b| b.id.clone())
            .ok_or_else(|| CoreError::Internal(format!("story {story_id} has no root branch")))
    }

    /// Fork a new branch off `parent_id` (active branch when omitted),
    /// inheriting the parent chain truncated after `fork_after_index`.
    pub fn create_branch(
        &self,
        story_id: &str,
        name: &str,
        parent_id: Option<&str>,
        fork_after_index: usize,
    ) -> Result<Branch> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("branch name is empty".to_string()));
        }
        let mut state = self.state(story_id)?;
        let parent_id = parent_id
            .map(str::to_string)
            .unwrap_or_else(|| state.active_branch_id.clone());
        let parent = state
            .branch(&parent_id)
            .ok_or_else(|| CoreError::not_found(format!("branch {parent_id}")))?
            .clone();

        let parent_chain = self.chain_of(story_id, &state, &parent.id)?;
        if !parent_chain.is_empty() && fork_after_index >= parent_chain.len() {
            return Err(CoreError::InvalidArgument(format!(
                "fork index {fork_after_index} out of range for chain of {}",
                parent_chain.len()
            )));
        }

        let branch = Branch::fork_of(&parent, name.trim(), fork_after_index);
        let mut inherited = parent_chain;
        inherited.truncate(fork_after_index + 1);

        let paths = self.paths(story_id);
        std::fs::create_dir_all(paths.fragments_dir(&branch.id))?;
        fsutil::write_json(&paths.chain(&branch.id), &inherited)?;

        state.branches.push(branch.clone());
        self.save_state(story_id, &state)?;
        tracing::debug!(story_id, branch_id = %branch.id, parent_id = %parent.id, "forked branch");
        Ok(branch)
    }

    pub fn switch_active(&self, story_id: &str, branch_id: &str) -> Result<()> {
        let mut state = self.state(story_id)?;
        if state.branch(branch_id).is_none() {
            return Err(CoreError::not_found(format!("branch {branch_id}")));
        }
        state.active_branch_id = branch_id.to_string();
        self.save_state(story_id, &state)
    }

    /// Delete a branch overlay. The active branch and branches with
    /// children refuse deletion.
    pub fn delete_branch(&self, story_id: &str, branch_id: &str) -> Result<()> {
        let mut state = self.state(story_id)?;
        if state.branch(branch_id).is_none() {
            return Err(CoreError::not_found(format!("branch {branch_id}")));
        }
        if state.active_branch_id == branch_id {
            return Err(CoreError::Conflict("cannot delete the active branch".to_string()));
        }
        if state
            .branches
            .iter()
            .any(|b| b.parent_id.as_deref() == Some(branch_id))
        {
            return Err(CoreError::Conflict(format!(
                "branch {branch_id} has child branches"
            )));
        }
        state.branches.retain(|b| b.id != branch_id);
        self.save_state(story_id, &state)?;
        let dir = self.paths(story_id).content_dir(branch_id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Content root directory of one branch.
    pub fn content_root_for(&self, story_id: &str, branch_id: &str) -> Result<PathBuf> {
        let state = self.state(story_id)?;
        if state.branch(branch_id).is_none() {
            return Err(CoreError::not_found(format!("branch {branch_id}")));
        }
        Ok(self.paths(story_id).content_dir(branch_id))
    }

    /// Resolve a fragment from the active branch leaf→root. A tombstone on
    /// the way hides the fragment. Returns the fragment and the branch the
    /// file was found on.
    pub fn resolve_fragment(
        &self,
        story_id: &str,
        fragment_id: &str,
    ) -> Result<Option<(Fragment, String)>> {
        let state = self.state(story_id)?;
        let active = state.active_branch_id.clone();
        self.resolve_fragment_from(story_id, &state, &active, fragment_id)
    }

    pub(crate) fn resolve_fragment_from(
        &self,
        story_id: &str,
        state: &BranchState,
        start_branch: &str,
        fragment_id: &str,
    ) -> Result<Option<(Fragment, String)>> {
        let paths = self.paths(story_id);
        for branch in state.ancestry(start_branch) {
            if paths.tombstone(&branch.id, fragment_id).exists() {
                return Ok(None);
            }
            if let Some(fragment) =
                fsutil::read_json::<Fragment>(&paths.fragment(&branch.id, fragment_id))?
            {
                return Ok(Some((fragment, branch.id.clone())));
            }
        }
        Ok(None)
    }

    /// The prose chain file of one branch (empty when never written).
    pub(crate) fn chain_of(
        &self,
        story_id: &str,
        state: &BranchState,
        branch_id: &str,
    ) -> Result<Vec<ChainSection>> {
        if state.branch(branch_id).is_none() {
            return Err(CoreError::not_found(format!("branch {branch_id}")));
        }
        fsutil::read_json_or_default(&self.paths(story_id).chain(branch_id))
    }
}
