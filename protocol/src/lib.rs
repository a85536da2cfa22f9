//! Wire and storage types shared by the storyloom engine and its callers.
//!
//! This crate is deliberately free of I/O: everything here is plain data
//! with serde derives, so the HTTP layer, the core engine, and plugins all
//! speak the same records without depending on each other.

pub mod branch;
pub mod chain;
pub mod event;
pub mod fragment;
pub mod ids;
pub mod librarian;
pub mod log;
pub mod message;
pub mod story;
pub mod tool;

pub use branch::{Branch, BranchState};
pub use chain::ChainSection;
pub use event::{FinishReason, ModelEvent};
pub use fragment::{Fragment, FragmentSnapshot, FragmentType, FrozenSection, Placement};
pub use librarian::{Analysis, AnalysisAnnotation, KnowledgeSuggestion, LibrarianState, RunStatus};
pub use log::{GenerationLog, GenerationMode};
pub use message::{MessageRole, PromptBlock};
pub use story::{ContextOrderMode, StoryMeta, StorySettings};
pub use tool::{ToolCallRecord, ToolSpec};
