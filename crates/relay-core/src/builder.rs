use std::sync::Arc;

use relay_llm::GenerationBackend;
use relay_persist::{MemoryStore, ThreadStore};
use tracing::info;

use crate::assistant::Assistant;
use crate::config::{AssistantConfig, MemoryType};
use crate::error::Result;
use crate::functions::{AssistantFunction, FunctionRegistry};
use crate::handoff::HumanHandlers;
use crate::middleware::{Middleware, Pipeline};
use crate::registry::{BackendRegistry, StorageRegistry};

/// Builder for an [`Assistant`]
///
/// Backend and storage come from the registries by the names in the config
/// unless given explicitly.
pub struct AssistantBuilder {
    config: AssistantConfig,
    backend: Option<Arc<dyn GenerationBackend>>,
    store: Option<Arc<dyn ThreadStore>>,
    backends: BackendRegistry,
    storages: StorageRegistry,
    functions: FunctionRegistry,
    pipeline: Pipeline,
    handlers: Option<Arc<dyn HumanHandlers>>,
}

impl AssistantBuilder {
    pub fn new() -> Self {
        Self {
            config: AssistantConfig::default(),
            backend: None,
            store: None,
            backends: BackendRegistry::with_builtins(),
            storages: StorageRegistry::with_builtins(),
            functions: FunctionRegistry::new(),
            pipeline: Pipeline::new(),
            handlers: None,
        }
    }

    pub fn config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this backend instead of resolving `config.provider`
    pub fn backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use this store instead of resolving `config.storage_provider`
    pub fn store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn backend_registry(mut self, registry: BackendRegistry) -> Self {
        self.backends = registry;
        self
    }

    pub fn storage_registry(mut self, registry: StorageRegistry) -> Self {
        self.storages = registry;
        self
    }

    pub fn function(mut self, function: Arc<dyn AssistantFunction>) -> Self {
        self.functions.register(function);
        self
    }

    /// Append a middleware step; steps run in the order they are added
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.pipeline.push(middleware);
        self
    }

    pub fn human_handlers(mut self, handlers: Arc<dyn HumanHandlers>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub async fn build(self) -> Result<Assistant> {
        let config = self.config;
        config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => self.backends.create(&config)?,
        };

        let store: Arc<dyn ThreadStore> = match self.store {
            Some(store) => store,
            None if config.memory_type == MemoryType::Session => {
                Arc::new(MemoryStore::with_ttl(config.ttl()))
            }
            None => self.storages.create(&config.storage_provider, &config).await?,
        };

        info!(
            backend = backend.name(),
            storage = store.name(),
            functions = self.functions.len(),
            middleware = self.pipeline.len(),
            "Assistant ready"
        );

        let restore = config.restore_handoffs;
        let assistant = Assistant::from_parts(
            config,
            backend,
            store,
            self.functions,
            self.pipeline,
            self.handlers,
        );

        if restore {
            assistant.restore_handoffs().await?;
        }

        Ok(assistant)
    }
}

impl Default for AssistantBuilder {
    fn default() -> Self {
        Self::new()
    }
}
