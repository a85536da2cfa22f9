//! Librarian scheduler: debounced background analysis after every save.
//!
//! State machine per story:
//!
//! ```text
//! idle ──trigger──▶ queued ──debounce──▶ running
//!  ▲                                       │
//!  └────────── done / error ◀──────────────┘
//! ```
//!
//! Re-triggers while queued reset the debounce timer; a trigger during a
//! run sets a pending flag that re-queues immediately on completion. Only
//! one run per story at a time. Errors land in `last_error` and the story
//! stays re-triggerable.

pub mod analysis;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use storyloom_protocol::fragment::meta_keys;
use storyloom_protocol::{
    Analysis, AnalysisAnnotation, Fragment, FragmentType, KnowledgeSuggestion, RunStatus,
    StoryMeta,
};
use uuid::Uuid;

use crate::chain::ProseChain;
use crate::error::{CoreError, Result};
use crate::locks::StoryLocks;
use crate::store::FragmentStore;
use crate::story::StoryStore;

pub use analysis::{AnalysisStore, LibrarianChat};

/// Snapshot handed to the analysis agent; reads are lock-free and taken at
/// run entry.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub story: StoryMeta,
    pub chain_len: usize,
    pub last_fragment_id: Option<String>,
    /// Active prose of the recent window, chain order.
    pub recent_prose: Vec<Fragment>,
}

/// What the agent hands back.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub directions: Vec<String>,
    pub knowledge_suggestions: Vec<KnowledgeSuggestion>,
    pub annotations: Vec<AnalysisAnnotation>,
}

/// The configured analysis agent (an LLM call in production, scripted in
/// tests).
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn analyze(&self, input: AnalysisInput) -> anyhow::Result<AnalysisOutcome>;
}

/// Scheduler knobs.
#[derive(Debug, Clone)]
pub struct LibrarianTuning {
    pub debounce_ms: u64,
}

impl Default for LibrarianTuning {
    fn default() -> Self {
        Self { debounce_ms: 5_000 }
    }
}

#[derive(Default)]
struct StorySched {
    status: RunStatus,
    epoch: u64,
    pending: bool,
    last_fragment_id: Option<String>,
}

pub struct LibrarianScheduler {
    stories: Arc<StoryStore>,
    store: Arc<FragmentStore>,
    chain: Arc<ProseChain>,
    locks: Arc<StoryLocks>,
    analyses: AnalysisStore,
    agent: Arc<dyn AnalysisAgent>,
    tuning: LibrarianTuning,
    scheds: StdMutex<HashMap<String, Arc<StdMutex<StorySched>>>>,
}

impl LibrarianScheduler {
    pub fn new(
        stories: Arc<StoryStore>,
        store: Arc<FragmentStore>,
        chain: Arc<ProseChain>,
        locks: Arc<StoryLocks>,
        analyses: AnalysisStore,
        agent: Arc<dyn AnalysisAgent>,
        tuning: LibrarianTuning,
    ) -> Self {
        Self {
            stories,
            store,
            chain,
            locks,
            analyses,
            agent,
            tuning,
            scheds: StdMutex::new(HashMap::new()),
        }
    }

    pub fn analyses(&self) -> &AnalysisStore {
        &self.analyses
    }

    fn sched_for(&self, story_id: &str) -> Arc<StdMutex<StorySched>> {
        let mut map = self.scheds.lock().expect("librarian registry poisoned");
        map.entry(story_id.to_string())
            .or_insert_with(|| Arc::new(StdMutex::new(StorySched::default())))
            .clone()
    }

    /// In-memory status, for callers that poll.
    pub fn status(&self, story_id: &str) -> RunStatus {
        let sched = self.sched_for(story_id);
        let sched = sched.lock().expect("librarian sched poisoned");
        sched.status
    }

    /// Fire-and-forget trigger, called after every save.
    pub fn trigger(self: &Arc<Self>, story_id: &str, fragment_id: Option<String>) {
        let sched = self.sched_for(story_id);
        let epoch = {
            let mut s = sched.lock().expect("librarian sched poisoned");
            if let Some(id) = fragment_id {
                s.last_fragment_id = Some(id);
            }
            if s.status == RunStatus::Running {
                // Coalesce: re-queue immediately when the current run ends.
                s.pending = true;
                return;
            }
            s.status = RunStatus::Queued;
            s.epoch += 1;
            s.epoch
        };
        self.persist_state(story_id, |state| {
            state.run_status = RunStatus::Queued;
            state.queued_since = Some(Utc::now());
        });

        let scheduler = self.clone();
        let story_id = story_id.to_string();
        let debounce = Duration::from_millis(self.tuning.debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                let s = sched.lock().expect("librarian sched poisoned");
                // A newer trigger re-armed the timer; this one is stale.
                if s.epoch != epoch || s.status != RunStatus::Queued {
                    return;
                }
            }
            scheduler.run_loop(&story_id, sched).await;
        });
    }

    async fn run_loop(self: Arc<Self>, story_id: &str, sched: Arc<StdMutex<StorySched>>) {
        loop {
            let last_fragment_id = {
                let mut s = sched.lock().expect("librarian sched poisoned");
                s.status = RunStatus::Running;
                s.pending = false;
                s.last_fragment_id.clone()
            };
            self.persist_state(story_id, |state| {
                state.run_status = RunStatus::Running;
                state.last_run_started_at = Some(Utc::now());
            });

            let result = self.run_analysis(story_id, last_fragment_id).await;
            match result {
                Ok(analysis) => {
                    tracing::debug!(story_id, analysis_id = %analysis.id, "librarian run complete");
                    self.persist_state(story_id, |state| {
                        state.run_status = RunStatus::Idle;
                        state.last_run_finished_at = Some(Utc::now());
                        state.last_error = None;
                        state.queued_since = None;
                    });
                    let mut s = sched.lock().expect("librarian sched poisoned");
                    s.status = RunStatus::Idle;
                    if !s.pending {
                        return;
                    }
                }
                Err(err) => {
                    tracing::error!(story_id, %err, "librarian run failed");
                    self.persist_state(story_id, |state| {
                        state.run_status = RunStatus::Error;
                        state.last_run_finished_at = Some(Utc::now());
                        state.last_error = Some(err.to_string());
                        state.queued_since = None;
                    });
                    let mut s = sched.lock().expect("librarian sched poisoned");
                    s.status = RunStatus::Error;
                    if !s.pending {
                        return;
                    }
                }
            }
            // A trigger arrived during the run; go again immediately.
        }
    }

    async fn run_analysis(
        &self,
        story_id: &str,
        last_fragment_id: Option<String>,
    ) -> Result<Analysis> {
        // Consistent snapshot, lock-free reads.
        let story = self.stories.get(story_id)?;
        let active_ids = self.chain.active_ids(story_id)?;
        let chain_len = active_ids.len();
        let window = story.settings.summarization_threshold.max(1);
        let mut recent_prose = Vec::new();
        for id in active_ids.iter().rev().take(window).rev() {
            if let Ok(fragment) = self.store.get(story_id, id) {
                recent_prose.push(fragment);
            }
        }

        let input = AnalysisInput {
            story,
            chain_len,
            last_fragment_id: last_fragment_id.clone(),
            recent_prose,
        };
        let outcome = self
            .agent
            .analyze(input)
            .await
            .map_err(|err| CoreError::Unavailable(format!("analysis agent: {err}")))?;

        // Persistence runs under the story write lock.
        let lock = self.locks.for_story(story_id);
        let _guard = lock.lock().await;
        let analysis = Analysis {
            id: Uuid::new_v4().to_string(),
            story_id: story_id.to_string(),
            chain_len,
            last_fragment_id,
            summary: outcome.summary,
            directions: outcome.directions,
            knowledge_suggestions: outcome.knowledge_suggestions,
            annotations: outcome.annotations,
            created_at: Utc::now(),
        };
        self.analyses.save(&analysis)?;

        // Annotation diffs go through the version-exempt meta channel;
        // vanished targets are skipped.
        for annotation in &analysis.annotations {
            match self.store.update_meta(
                story_id,
                &annotation.fragment_id,
                meta_keys::ANNOTATIONS,
                annotation.annotations.clone(),
            ) {
                Ok(_) => {}
                Err(CoreError::NotFound(_)) => {
                    tracing::warn!(
                        story_id,
                        fragment_id = %annotation.fragment_id,
                        "annotation target is gone"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(analysis)
    }

    /// Turn a knowledge suggestion into a `kn-*` fragment and mark it
    /// accepted.
    pub async fn accept_suggestion(
        &self,
        story_id: &str,
        analysis_id: &str,
        index: usize,
    ) -> Result<Fragment> {
        let lock = self.locks.for_story(story_id);
        let _guard = lock.lock().await;

        let mut analysis = self.analyses.get(story_id, analysis_id)?;
        let suggestion = analysis
            .knowledge_suggestions
            .get(index)
            .cloned()
            .ok_or_else(|| {
                CoreError::not_found(format!("suggestion {index} of analysis {analysis_id}"))
            })?;
        if suggestion.accepted {
            return Err(CoreError::Conflict(format!(
                "suggestion {index} of analysis {analysis_id} already accepted"
            )));
        }

        let mut fragment = Fragment::new(FragmentType::Knowledge, suggestion.name.clone());
        fragment.content = suggestion.content.clone();
        fragment.tags = suggestion.tags.clone();
        fragment
            .meta
            .insert(meta_keys::SOURCE.to_string(), json!("librarian"));
        fragment
            .meta
            .insert(meta_keys::ANALYSIS_ID.to_string(), json!(analysis_id));
        fragment
            .meta
            .insert(meta_keys::SUGGESTION_INDEX.to_string(), json!(index));
        let fragment = self.store.create(story_id, fragment)?;

        let entry = &mut analysis.knowledge_suggestions[index];
        entry.accepted = true;
        entry.created_fragment_id = Some(fragment.id.clone());
        self.analyses.save(&analysis)?;
        Ok(fragment)
    }

    /// Poll until the story's scheduler settles (no queued/running work).
    /// Mostly useful for tests and orderly shutdown.
    pub async fn wait_until_settled(&self, story_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let settled = {
                let sched = self.sched_for(story_id);
                let s = sched.lock().expect("librarian sched poisoned");
                !s.pending && matches!(s.status, RunStatus::Idle | RunStatus::Error)
            };
            if settled {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn persist_state(&self, story_id: &str, apply: impl FnOnce(&mut storyloom_protocol::LibrarianState)) {
        let result = self.analyses.state(story_id).and_then(|mut state| {
            apply(&mut state);
            self.analyses.save_state(story_id, &state)
        });
        if let Err(err) = result {
            tracing::warn!(story_id, %err, "librarian state write failed");
        }
    }
}
