//! Prose chain sections.
//!
//! The chain is an ordered list of sections; each section holds the
//! variations (alternate takes) of one passage and the currently active
//! pick. A marker fragment occupies a section of its own.

use serde::{Deserialize, Serialize};

/// One section of the prose chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSection {
    /// Variation fragment ids, in the order they were added.
    pub prose_fragments: Vec<String>,
    /// The variation currently shown; always a member of `prose_fragments`.
    pub active: String,
}

impl ChainSection {
    pub fn single(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            prose_fragments: vec![id.clone()],
            active: id,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.prose_fragments.iter().any(|f| f == id)
    }
}
