//! The engine facade: one object wiring stores, plugins, providers, and
//! the librarian, for the HTTP layer (or an embedding host) to hold.

use std::sync::Arc;

use crate::associations::AssociationIndex;
use crate::branches::BranchManager;
use crate::chain::ProseChain;
use crate::config::{Config, ProvidersConfig};
use crate::context::{ContextBuilder, ShortlistLimits};
use crate::error::Result;
use crate::generation::log::GenerationLogStore;
use crate::generation::{GenerateRequest, GenerationHandle, Generator};
use crate::librarian::{
    AnalysisAgent, AnalysisInput, AnalysisOutcome, AnalysisStore, LibrarianScheduler,
    LibrarianTuning,
};
use crate::locks::StoryLocks;
use crate::plugins::{Plugin, PluginRegistry};
use crate::provider::{ModelClient, ProviderRegistry};
use crate::store::{FragmentStore, StoreTuning};
use crate::story::StoryStore;
use crate::tools::FragmentTools;

/// Analysis agent used when the host configures none: every run produces
/// an empty outcome.
struct NullAnalysisAgent;

#[async_trait::async_trait]
impl AnalysisAgent for NullAnalysisAgent {
    async fn analyze(&self, _input: AnalysisInput) -> anyhow::Result<AnalysisOutcome> {
        Ok(AnalysisOutcome::default())
    }
}

pub struct EngineBuilder {
    config: Config,
    providers_config: Option<ProvidersConfig>,
    clients: Vec<(String, Arc<dyn ModelClient>)>,
    plugins: Vec<Arc<dyn Plugin>>,
    analysis_agent: Option<Arc<dyn AnalysisAgent>>,
    store_tuning: StoreTuning,
    librarian_tuning: LibrarianTuning,
    shortlist_limits: ShortlistLimits,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            providers_config: None,
            clients: Vec::new(),
            plugins: Vec::new(),
            analysis_agent: None,
            store_tuning: StoreTuning::default(),
            librarian_tuning: LibrarianTuning::default(),
            shortlist_limits: ShortlistLimits::default(),
        }
    }

    /// Override the provider registry instead of loading `config.json`.
    pub fn providers(mut self, providers: ProvidersConfig) -> Self {
        self.providers_config = Some(providers);
        self
    }

    pub fn model_client(mut self, provider_id: &str, client: Arc<dyn ModelClient>) -> Self {
        self.clients.push((provider_id.to_string(), client));
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn analysis_agent(mut self, agent: Arc<dyn AnalysisAgent>) -> Self {
        self.analysis_agent = Some(agent);
        self
    }

    pub fn store_tuning(mut self, tuning: StoreTuning) -> Self {
        self.store_tuning = tuning;
        self
    }

    pub fn librarian_tuning(mut self, tuning: LibrarianTuning) -> Self {
        self.librarian_tuning = tuning;
        self
    }

    pub fn shortlist_limits(mut self, limits: ShortlistLimits) -> Self {
        self.shortlist_limits = limits;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = Arc::new(self.config);
        let providers_config = match self.providers_config {
            Some(providers) => providers,
            None => ProvidersConfig::load(&config)?,
        };

        let locks = Arc::new(StoryLocks::new());
        let stories = Arc::new(StoryStore::new(config.clone()));
        let branches = Arc::new(BranchManager::new(config.clone()));
        let store = Arc::new(FragmentStore::new(
            config.clone(),
            branches.clone(),
            self.store_tuning,
        ));
        let associations = Arc::new(AssociationIndex::new(config.clone(), branches.clone()));
        let chain = Arc::new(ProseChain::new(config.clone(), branches.clone()));
        let context = Arc::new(ContextBuilder::new(
            stories.clone(),
            store.clone(),
            chain.clone(),
            self.shortlist_limits,
        ));
        let tools = Arc::new(FragmentTools::new(
            store.clone(),
            associations.clone(),
            locks.clone(),
        ));

        let mut plugin_registry = PluginRegistry::new();
        for plugin in self.plugins {
            plugin_registry.register(plugin);
        }
        let plugins = Arc::new(plugin_registry);

        let mut provider_registry = ProviderRegistry::new(providers_config);
        for (provider_id, client) in self.clients {
            provider_registry.register_client(&provider_id, client);
        }
        let providers = Arc::new(provider_registry);

        let agent = self
            .analysis_agent
            .unwrap_or_else(|| Arc::new(NullAnalysisAgent));
        let librarian = Arc::new(LibrarianScheduler::new(
            stories.clone(),
            store.clone(),
            chain.clone(),
            locks.clone(),
            AnalysisStore::new(config.clone()),
            agent,
            self.librarian_tuning,
        ));

        let logs = Arc::new(GenerationLogStore::new(config.clone()));
        let generator = Arc::new(Generator {
            store: store.clone(),
            chain: chain.clone(),
            context,
            plugins: plugins.clone(),
            providers: providers.clone(),
            tools: tools.clone(),
            librarian: librarian.clone(),
            logs: logs.clone(),
            locks: locks.clone(),
        });

        Ok(Engine {
            config,
            stories,
            branches,
            store,
            associations,
            chain,
            tools,
            plugins,
            providers,
            librarian,
            logs,
            locks,
            generator,
        })
    }
}

pub struct Engine {
    pub config: Arc<Config>,
    pub stories: Arc<StoryStore>,
    pub branches: Arc<BranchManager>,
    pub store: Arc<FragmentStore>,
    pub associations: Arc<AssociationIndex>,
    pub chain: Arc<ProseChain>,
    pub tools: Arc<FragmentTools>,
    pub plugins: Arc<PluginRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub librarian: Arc<LibrarianScheduler>,
    pub logs: Arc<GenerationLogStore>,
    pub locks: Arc<StoryLocks>,
    generator: Arc<Generator>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Run one generate call; see [`crate::generation`].
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationHandle> {
        self.generator.generate(request).await
    }

    /// Remove a chain section and archive its variations. Removal never
    /// hard-deletes prose.
    pub async fn remove_chain_section(
        &self,
        story_id: &str,
        section_index: usize,
    ) -> Result<Vec<String>> {
        let lock = self.locks.for_story(story_id);
        let _guard = lock.lock().await;
        let removed = self.chain.remove_section(story_id, section_index)?;
        for fragment_id in &removed {
            self.store.archive(story_id, fragment_id)?;
        }
        Ok(removed)
    }
}
