//! Prose chain operations.
//!
//! The chain of the active branch is an ordered list of sections, each with
//! its variations and one active pick. Regeneration appends variations;
//! fresh generation appends sections. Removing a section hands the removed
//! variation ids back to the caller, which is expected to archive them.

use std::sync::Arc;

use storyloom_protocol::{ChainSection, Fragment, FragmentType};

use crate::branches::BranchManager;
use crate::config::{Config, StoryPaths};
use crate::error::{CoreError, Result};
use crate::fsutil;

pub struct ProseChain {
    config: Arc<Config>,
    branches: Arc<BranchManager>,
}

impl ProseChain {
    pub fn new(config: Arc<Config>, branches: Arc<BranchManager>) -> Self {
        Self { config, branches }
    }

    fn chain_path(&self, story_id: &str) -> Result<std::path::PathBuf> {
        let active = self.branches.active_branch_id(story_id)?;
        Ok(StoryPaths::new(&self.config, story_id).chain(&active))
    }

    /// The active branch's chain, empty when never written.
    pub fn get(&self, story_id: &str) -> Result<Vec<ChainSection>> {
        fsutil::read_json_or_default(&self.chain_path(story_id)?)
    }

    fn save(&self, story_id: &str, sections: &[ChainSection]) -> Result<()> {
        fsutil::write_json(&self.chain_path(story_id)?, &sections.to_vec())
    }

    /// Append a new single-variation section. Only prose and marker
    /// fragments belong in the chain; archived ones never do.
    pub fn add_section(&self, story_id: &str, fragment: &Fragment) -> Result<usize> {
        if !matches!(fragment.kind, FragmentType::Prose | FragmentType::Marker) {
            return Err(CoreError::InvalidArgument(format!(
                "fragment {} is {}, not prose or marker",
                fragment.id, fragment.kind
            )));
        }
        if fragment.archived {
            return Err(CoreError::Conflict(format!(
                "archived fragment {} cannot join the chain",
                fragment.id
            )));
        }
        let mut sections = self.get(story_id)?;
        sections.push(ChainSection::single(&fragment.id));
        self.save(story_id, &sections)?;
        Ok(sections.len() - 1)
    }

    /// Append a variation to an existing section and make it active.
    /// Marker sections take no variations.
    pub fn add_variation(
        &self,
        story_id: &str,
        section_index: usize,
        fragment: &Fragment,
    ) -> Result<()> {
        if fragment.kind != FragmentType::Prose {
            return Err(CoreError::InvalidArgument(format!(
                "variation {} is {}, not prose",
                fragment.id, fragment.kind
            )));
        }
        if fragment.archived {
            return Err(CoreError::Conflict(format!(
                "archived fragment {} cannot join the chain",
                fragment.id
            )));
        }
        let mut sections = self.get(story_id)?;
        let section = sections
            .get_mut(section_index)
            .ok_or_else(|| CoreError::not_found(format!("chain section {section_index}")))?;
        if section.active.starts_with("mk-") {
            return Err(CoreError::Conflict(
                "marker sections have no variations".to_string(),
            ));
        }
        if !section.contains(&fragment.id) {
            section.prose_fragments.push(fragment.id.clone());
        }
        section.active = fragment.id.clone();
        self.save(story_id, &sections)
    }

    /// Pick a variation already present in the section.
    pub fn switch_active(
        &self,
        story_id: &str,
        section_index: usize,
        fragment_id: &str,
    ) -> Result<()> {
        let mut sections = self.get(story_id)?;
        let section = sections
            .get_mut(section_index)
            .ok_or_else(|| CoreError::not_found(format!("chain section {section_index}")))?;
        if !section.contains(fragment_id) {
            return Err(CoreError::Conflict(format!(
                "variation {fragment_id} is not in section {section_index}"
            )));
        }
        section.active = fragment_id.to_string();
        self.save(story_id, &sections)
    }

    /// Permute sections by an index vector covering `[0..n)` exactly once.
    pub fn reorder(&self, story_id: &str, order: &[usize]) -> Result<()> {
        let sections = self.get(story_id)?;
        if order.len() != sections.len() {
            return Err(CoreError::InvalidArgument(format!(
                "order has {} entries for {} sections",
                order.len(),
                sections.len()
            )));
        }
        let mut seen = vec![false; sections.len()];
        for &index in order {
            if index >= sections.len() || seen[index] {
                return Err(CoreError::InvalidArgument(
                    "order is not a permutation".to_string(),
                ));
            }
            seen[index] = true;
        }
        let reordered: Vec<ChainSection> =
            order.iter().map(|&i| sections[i].clone()).collect();
        self.save(story_id, &reordered)
    }

    /// Remove a section, returning its variation ids for the caller to
    /// archive. Later sections shift down.
    pub fn remove_section(&self, story_id: &str, section_index: usize) -> Result<Vec<String>> {
        let mut sections = self.get(story_id)?;
        if section_index >= sections.len() {
            return Err(CoreError::not_found(format!("chain section {section_index}")));
        }
        let removed = sections.remove(section_index);
        self.save(story_id, &sections)?;
        Ok(removed.prose_fragments)
    }

    /// First section containing `fragment_id`.
    pub fn find_section_index(&self, story_id: &str, fragment_id: &str) -> Result<Option<usize>> {
        Ok(self
            .get(story_id)?
            .iter()
            .position(|s| s.contains(fragment_id)))
    }

    /// Active fragment ids in chain order.
    pub fn active_ids(&self, story_id: &str) -> Result<Vec<String>> {
        Ok(self.get(story_id)?.into_iter().map(|s| s.active).collect())
    }
}
