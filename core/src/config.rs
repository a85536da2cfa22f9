//! Runtime configuration and the provider registry file.
//!
//! The core reads two environment variables: `DATA_DIR` (default `./data`)
//! and `PLUGIN_DIR` (optional). `config.json` at the data root holds the
//! provider registry consumed by model resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsutil;

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub plugin_dir: Option<PathBuf>,
}

impl Config {
    /// Read `DATA_DIR` / `PLUGIN_DIR` from the environment.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let plugin_dir = std::env::var("PLUGIN_DIR").ok().map(PathBuf::from);
        Self {
            data_dir,
            plugin_dir,
        }
    }

    /// Config rooted at an explicit data directory (tests, embedding).
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            plugin_dir: None,
        }
    }

    pub fn stories_dir(&self) -> PathBuf {
        self.data_dir.join("stories")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }
}

/// One provider entry of `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    pub id: String,
    pub name: String,
    /// Model used when the story does not override one.
    pub default_model: String,
}

/// `config.json`: providers plus the default pick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider_id: Option<String>,
}

impl ProvidersConfig {
    pub fn provider(&self, id: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn load(config: &Config) -> Result<Self> {
        fsutil::read_json_or_default(&config.config_path())
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        fsutil::write_json(&config.config_path(), self)
    }
}

/// Filesystem layout of one story, rooted at `stories/<storyId>/`.
#[derive(Debug, Clone)]
pub struct StoryPaths {
    root: PathBuf,
}

impl StoryPaths {
    pub fn new(config: &Config, story_id: &str) -> Self {
        Self {
            root: config.stories_dir().join(story_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> PathBuf {
        self.root.join("meta.json")
    }

    pub fn branches(&self) -> PathBuf {
        self.root.join("branches.json")
    }

    pub fn content_dir(&self, branch_id: &str) -> PathBuf {
        self.root.join("content").join(branch_id)
    }

    pub fn fragments_dir(&self, branch_id: &str) -> PathBuf {
        self.content_dir(branch_id).join("fragments")
    }

    pub fn fragment(&self, branch_id: &str, fragment_id: &str) -> PathBuf {
        self.fragments_dir(branch_id).join(format!("{fragment_id}.json"))
    }

    pub fn tombstone(&self, branch_id: &str, fragment_id: &str) -> PathBuf {
        self.fragments_dir(branch_id).join(format!("{fragment_id}.tomb"))
    }

    pub fn associations(&self, branch_id: &str) -> PathBuf {
        self.content_dir(branch_id).join("associations.json")
    }

    pub fn chain(&self, branch_id: &str) -> PathBuf {
        self.content_dir(branch_id).join("prose-chain.json")
    }

    pub fn librarian_dir(&self) -> PathBuf {
        self.root.join("librarian")
    }

    pub fn librarian_state(&self) -> PathBuf {
        self.librarian_dir().join("state.json")
    }

    pub fn librarian_chat(&self) -> PathBuf {
        self.librarian_dir().join("chat.json")
    }

    pub fn analyses_dir(&self) -> PathBuf {
        self.librarian_dir().join("analyses")
    }

    pub fn analysis(&self, analysis_id: &str) -> PathBuf {
        self.analyses_dir().join(format!("{analysis_id}.json"))
    }

    pub fn generation_logs_dir(&self) -> PathBuf {
        self.root.join("generation-logs")
    }

    pub fn generation_log(&self, log_id: &str) -> PathBuf {
        self.generation_logs_dir().join(format!("{log_id}.json"))
    }
}
