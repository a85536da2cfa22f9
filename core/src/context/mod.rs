//! Context builder: decides what goes into each LLM call.
//!
//! Two phases. Phase 1 reads the store and produces a [`ContextState`]
//! snapshot: prose window (chain order, summarized past the threshold),
//! sticky fragments, and ranked shortlists per type. Phase 2
//! ([`assemble::assemble_messages`]) turns a state into the fixed-order
//! message list. Plugins see the state between the phases and may return a
//! replacement.

pub mod assemble;
pub mod instructions;

use std::collections::HashSet;
use std::sync::Arc;

use storyloom_protocol::{Fragment, FragmentType, Placement, StoryMeta};

use crate::chain::ProseChain;
use crate::error::Result;
use crate::store::FragmentStore;
use crate::story::StoryStore;

/// Shortlist sizes per type. Tunables; the defaults match the product.
#[derive(Debug, Clone)]
pub struct ShortlistLimits {
    pub characters: usize,
    pub guidelines: usize,
    pub knowledge: usize,
}

impl Default for ShortlistLimits {
    fn default() -> Self {
        Self {
            characters: 6,
            guidelines: 4,
            knowledge: 8,
        }
    }
}

/// Everything phase 2 needs, and the snapshot plugins get to transform.
#[derive(Debug, Clone)]
pub struct ContextState {
    pub story: StoryMeta,
    /// Effective input of this call (refine rewrites it; `generated_from`
    /// keeps the raw one).
    pub input: String,
    /// Active prose window in chain order. When `summarized`, only the last
    /// `summarization_threshold` passages.
    pub prose: Vec<Fragment>,
    pub summarized: bool,
    /// Sticky fragments with `placement = system`, any type.
    pub system_fragments: Vec<Fragment>,
    /// Sticky(user) ∪ shortlist, deduped by id, per type.
    pub characters: Vec<Fragment>,
    pub guidelines: Vec<Fragment>,
    pub knowledge: Vec<Fragment>,
}

pub struct ContextBuilder {
    stories: Arc<StoryStore>,
    store: Arc<FragmentStore>,
    chain: Arc<ProseChain>,
    limits: ShortlistLimits,
}

impl ContextBuilder {
    pub fn new(
        stories: Arc<StoryStore>,
        store: Arc<FragmentStore>,
        chain: Arc<ProseChain>,
        limits: ShortlistLimits,
    ) -> Self {
        Self {
            stories,
            store,
            chain,
            limits,
        }
    }

    /// Phase 1: read the story and build the context state.
    pub fn build(
        &self,
        story_id: &str,
        input: &str,
        exclude_fragment_id: Option<&str>,
    ) -> Result<ContextState> {
        let story = self.stories.get(story_id)?;
        let threshold = story.settings.summarization_threshold;

        // Prose window: chain order when a chain exists, manual order
        // otherwise.
        let active_ids = self.chain.active_ids(story_id)?;
        let mut prose: Vec<Fragment> = if active_ids.is_empty() {
            self.store.list(story_id, Some(&FragmentType::Prose), false)?
        } else {
            let mut out = Vec::with_capacity(active_ids.len());
            for id in &active_ids {
                // Chain entries may lag behind archival; skip silently.
                if let Ok(fragment) = self.store.get(story_id, id)
                    && !fragment.archived
                {
                    out.push(fragment);
                }
            }
            out
        };
        prose.retain(|f| Some(f.id.as_str()) != exclude_fragment_id);

        let summarized = threshold > 0 && prose.len() > threshold;
        if summarized {
            let start = prose.len() - threshold;
            prose.drain(..start);
        }
        // Refs from the recent window (what survived truncation) drive the
        // shortlist ranking.
        let recent_refs: HashSet<String> = prose
            .iter()
            .flat_map(|f| f.refs.iter().cloned())
            .collect();

        let input_tokens = tokenize(input);

        let mut system_fragments = Vec::new();
        let characters = self.partition(
            story_id,
            &FragmentType::Character,
            self.limits.characters,
            &recent_refs,
            &input_tokens,
            exclude_fragment_id,
            &mut system_fragments,
        )?;
        let guidelines = self.partition(
            story_id,
            &FragmentType::Guideline,
            self.limits.guidelines,
            &recent_refs,
            &input_tokens,
            exclude_fragment_id,
            &mut system_fragments,
        )?;
        let knowledge = self.partition(
            story_id,
            &FragmentType::Knowledge,
            self.limits.knowledge,
            &recent_refs,
            &input_tokens,
            exclude_fragment_id,
            &mut system_fragments,
        )?;

        Ok(ContextState {
            story,
            input: input.to_string(),
            prose,
            summarized,
            system_fragments,
            characters,
            guidelines,
            knowledge,
        })
    }

    /// Sticky(user) ∪ ranked shortlist for one type; sticky(system) entries
    /// are diverted into `system_fragments`.
    #[allow(clippy::too_many_arguments)]
    fn partition(
        &self,
        story_id: &str,
        kind: &FragmentType,
        limit: usize,
        recent_refs: &HashSet<String>,
        input_tokens: &HashSet<String>,
        exclude_fragment_id: Option<&str>,
        system_fragments: &mut Vec<Fragment>,
    ) -> Result<Vec<Fragment>> {
        let all = self.store.list(story_id, Some(kind), false)?;
        let mut picked = Vec::new();
        let mut candidates = Vec::new();
        for fragment in all {
            if Some(fragment.id.as_str()) == exclude_fragment_id {
                continue;
            }
            if fragment.sticky {
                if fragment.placement == Placement::System {
                    system_fragments.push(fragment);
                } else {
                    picked.push(fragment);
                }
            } else {
                candidates.push(fragment);
            }
        }

        // Rank: referenced by recent prose first, then tag overlap with the
        // input, then recency.
        candidates.sort_by(|a, b| {
            let key_a = rank_key(a, recent_refs, input_tokens);
            let key_b = rank_key(b, recent_refs, input_tokens);
            key_b
                .0
                .cmp(&key_a.0)
                .then(key_b.1.cmp(&key_a.1))
                .then(b.updated_at.cmp(&a.updated_at))
                .then(a.id.cmp(&b.id))
        });

        let sticky_count = picked.len();
        for candidate in candidates {
            if picked.len() - sticky_count >= limit {
                break;
            }
            picked.push(candidate);
        }
        Ok(picked)
    }
}

fn rank_key(
    fragment: &Fragment,
    recent_refs: &HashSet<String>,
    input_tokens: &HashSet<String>,
) -> (bool, usize) {
    let referenced = recent_refs.contains(&fragment.id);
    let overlap = fragment
        .tags
        .iter()
        .filter(|t| input_tokens.contains(t.as_str()))
        .count();
    (referenced, overlap)
}

fn tokenize(input: &str) -> HashSet<String> {
    input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
