//! Branches: named copy-on-write overlays of a story's content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A branch record. The root branch has no parent and no fork point; every
/// other branch forks from its parent's prose chain after
/// `fork_after_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_after_index: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    /// The root branch created with a story. Its content directory is the
    /// base every other branch ultimately resolves against.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            id: crate::ids::branch_id(),
            parent_id: None,
            name: name.into(),
            fork_after_index: None,
            created_at: Utc::now(),
        }
    }

    pub fn fork_of(parent: &Branch, name: impl Into<String>, fork_after_index: usize) -> Self {
        Self {
            id: crate::ids::branch_id(),
            parent_id: Some(parent.id.clone()),
            name: name.into(),
            fork_after_index: Some(fork_after_index),
            created_at: Utc::now(),
        }
    }
}

/// Persisted branch state of a story (`branches.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchState {
    pub branches: Vec<Branch>,
    pub active_branch_id: String,
}

impl BranchState {
    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    pub fn active(&self) -> Option<&Branch> {
        self.branch(&self.active_branch_id)
    }

    /// The branch chain from `id` up to the root, leaf first.
    pub fn ancestry(&self, id: &str) -> Vec<&Branch> {
        let mut out = Vec::new();
        let mut cursor = self.branch(id);
        while let Some(branch) = cursor {
            out.push(branch);
            cursor = branch.parent_id.as_deref().and_then(|p| self.branch(p));
        }
        out
    }
}
