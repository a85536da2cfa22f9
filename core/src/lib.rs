//! Root of the `storyloom-core` library.
//!
//! The write-path engine of the storyloom writing workspace: fragment
//! store with branch overlays, prose chain, context builder, generation
//! pipeline, fragment tools, plugin hooks, and the librarian scheduler.
//! The HTTP layer, provider wire protocols, and the UI live outside this
//! crate and consume it through [`engine::Engine`].

// Library code never talks to stdout/stderr directly; everything
// user-visible goes through tracing or the returned streams.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod associations;
pub mod branches;
pub mod chain;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod generation;
pub mod librarian;
pub mod locks;
pub mod plugins;
pub mod provider;
pub mod store;
pub mod story;
pub mod tools;

pub use engine::{Engine, EngineBuilder};
pub use error::{CoreError, Result};
pub use generation::{GenerateRequest, GenerationHandle, GenerationOutcome};
pub use provider::{ModelClient, ModelRequest, ModelStream};
