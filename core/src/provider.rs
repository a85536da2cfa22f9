//! Model boundary: the injected client trait and provider resolution.
//!
//! Concrete wire protocols live outside the core. A host registers one
//! [`ModelClient`] per provider entry of `config.json`; the pipeline
//! resolves story overrides against the registry and drives whatever stream
//! the client hands back.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use futures::Stream;
use storyloom_protocol::{ModelEvent, PromptBlock, StorySettings, ToolSpec};
use tokio::sync::mpsc;

use crate::config::ProvidersConfig;
use crate::error::{CoreError, Result};

/// One outbound model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<PromptBlock>,
    /// Advertised tools; tool choice is always auto.
    pub tools: Vec<ToolSpec>,
}

/// Channel-backed stream of model events. The producing task pushes into
/// the sender; dropping the receiver tells the producer to stop.
pub struct ModelStream {
    rx: mpsc::Receiver<Result<ModelEvent>>,
}

impl ModelStream {
    /// Default channel capacity; bounds how far the provider can run ahead
    /// of the slower tee consumer.
    pub const BUFFER: usize = 64;

    pub fn channel() -> (mpsc::Sender<Result<ModelEvent>>, ModelStream) {
        let (tx, rx) = mpsc::channel(Self::BUFFER);
        (tx, ModelStream { rx })
    }

    /// A finished stream over scripted events (testing, replay).
    pub fn from_events(events: Vec<ModelEvent>) -> ModelStream {
        let (tx, stream) = Self::channel();
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });
        stream
    }
}

impl Stream for ModelStream {
    type Item = Result<ModelEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The injected model boundary.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream>;
}

/// Provider + model a call resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider_id: String,
    pub model: String,
}

/// Registry pairing `config.json` provider entries with injected clients.
pub struct ProviderRegistry {
    providers: ProvidersConfig,
    clients: HashMap<String, Arc<dyn ModelClient>>,
}

impl ProviderRegistry {
    pub fn new(providers: ProvidersConfig) -> Self {
        Self {
            providers,
            clients: HashMap::new(),
        }
    }

    pub fn register_client(&mut self, provider_id: &str, client: Arc<dyn ModelClient>) {
        self.clients.insert(provider_id.to_string(), client);
    }

    /// Story override → default provider; model override → provider's
    /// default model.
    pub fn resolve(&self, settings: &StorySettings) -> Result<ResolvedModel> {
        let provider_id = settings
            .provider_id
            .clone()
            .or_else(|| self.providers.default_provider_id.clone())
            .ok_or_else(|| CoreError::Unavailable("no provider configured".to_string()))?;
        let entry = self
            .providers
            .provider(&provider_id)
            .ok_or_else(|| CoreError::not_found(format!("provider {provider_id}")))?;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| entry.default_model.clone());
        Ok(ResolvedModel { provider_id, model })
    }

    pub fn client_for(&self, provider_id: &str) -> Result<Arc<dyn ModelClient>> {
        self.clients
            .get(provider_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::Unavailable(format!("no client registered for provider {provider_id}"))
            })
    }
}
