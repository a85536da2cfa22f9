//! Per-story exclusive write locks.
//!
//! Fragment mutations, association updates, prose-chain mutations, and
//! branch operations for one story serialize on its lock. Reads stay
//! lock-free and rely on atomic renames. Cross-story operations never take
//! a global lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

/// Lazily-populated registry of per-story locks.
#[derive(Default)]
pub struct StoryLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `story_id`, created on first use.
    pub fn for_story(&self, story_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("story lock registry poisoned");
        map.entry(story_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry of a deleted story.
    pub fn forget(&self, story_id: &str) {
        let mut map = self.inner.lock().expect("story lock registry poisoned");
        map.remove(story_id);
    }
}
