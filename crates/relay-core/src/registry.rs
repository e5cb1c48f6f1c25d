// Name -> factory lookups for generation backends and storage adapters

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use relay_llm::{AnthropicClient, GenerationBackend, OpenAIClient};
use relay_persist::{MemoryStore, ThreadStore};

use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};

pub type BackendFactory =
    Arc<dyn Fn(&AssistantConfig) -> Result<Arc<dyn GenerationBackend>> + Send + Sync>;

pub type StorageFactory =
    Arc<dyn Fn(AssistantConfig) -> BoxFuture<'static, Result<Arc<dyn ThreadStore>>> + Send + Sync>;

#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// `openai` and `anthropic`
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register("openai", |config: &AssistantConfig| {
            let client = OpenAIClient::from_config(&config.provider_config())
                .map_err(|e| AssistantError::Config(e.to_string()))?;
            Ok(Arc::new(client) as Arc<dyn GenerationBackend>)
        });

        registry.register("anthropic", |config: &AssistantConfig| {
            let client = AnthropicClient::from_config(&config.provider_config())
                .map_err(|e| AssistantError::Config(e.to_string()))?;
            Ok(Arc::new(client) as Arc<dyn GenerationBackend>)
        });

        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&AssistantConfig) -> Result<Arc<dyn GenerationBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, config: &AssistantConfig) -> Result<Arc<dyn GenerationBackend>> {
        let factory = self
            .factories
            .get(&config.provider)
            .ok_or_else(|| AssistantError::unsupported("generation", &config.provider))?;
        factory(config)
    }
}

#[derive(Clone)]
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl StorageRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// `memory`, plus `sqlite`/`sql` and `mongodb` when those features are on
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register("memory", |config: AssistantConfig| Box::pin(open_memory(config)));

        #[cfg(feature = "sqlite")]
        {
            registry.register("sqlite", |config: AssistantConfig| Box::pin(open_sqlite(config)));
            registry.register("sql", |config: AssistantConfig| Box::pin(open_sqlite(config)));
        }

        #[cfg(feature = "mongodb")]
        registry.register("mongodb", |config: AssistantConfig| Box::pin(open_mongodb(config)));

        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(AssistantConfig) -> BoxFuture<'static, Result<Arc<dyn ThreadStore>>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub async fn create(&self, name: &str, config: &AssistantConfig) -> Result<Arc<dyn ThreadStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AssistantError::unsupported("storage", name))?;
        factory(config.clone()).await
    }
}

async fn open_memory(config: AssistantConfig) -> Result<Arc<dyn ThreadStore>> {
    Ok(Arc::new(MemoryStore::with_ttl(config.ttl())))
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(config: AssistantConfig) -> Result<Arc<dyn ThreadStore>> {
    let path = config.storage_uri.as_deref().unwrap_or("relay.db");
    let store = if path == ":memory:" {
        relay_persist::SqliteStore::open_in_memory(config.ttl()).await?
    } else {
        relay_persist::SqliteStore::open(path, config.ttl()).await?
    };
    Ok(Arc::new(store))
}

#[cfg(feature = "mongodb")]
async fn open_mongodb(config: AssistantConfig) -> Result<Arc<dyn ThreadStore>> {
    let uri = config.storage_uri.as_deref().ok_or_else(|| {
        AssistantError::Config("storage_uri is required for mongodb storage".to_string())
    })?;
    let store =
        relay_persist::MongoThreadStore::connect(uri, &config.storage_database, config.ttl()).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backend_is_unsupported() {
        let registry = BackendRegistry::with_builtins();
        let config = AssistantConfig::default().with_provider("llama-farm");

        match registry.create(&config) {
            Err(AssistantError::UnsupportedProvider { kind, name }) => {
                assert_eq!(kind, "generation");
                assert_eq!(name, "llama-farm");
            }
            other => panic!("expected UnsupportedProvider, got {:?}", other.map(|b| b.name().to_string())),
        }
    }

    #[test]
    fn test_builtin_backends_resolve() {
        let registry = BackendRegistry::with_builtins();
        for provider in ["openai", "anthropic"] {
            let config = AssistantConfig::default().with_provider(provider).with_api_key("test-key");
            let backend = registry.create(&config).unwrap();
            assert_eq!(backend.name(), provider);
        }
    }

    #[tokio::test]
    async fn test_unknown_storage_is_unsupported() {
        let registry = StorageRegistry::with_builtins();
        let result = registry.create("etcd", &AssistantConfig::default()).await;
        assert!(matches!(
            result,
            Err(AssistantError::UnsupportedProvider { kind: "storage", .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_storage_registration() {
        let mut registry = StorageRegistry::empty();
        registry.register("scratch", |_config: AssistantConfig| {
            Box::pin(async { Ok::<_, AssistantError>(Arc::new(MemoryStore::new()) as Arc<dyn ThreadStore>) })
        });

        let store = registry.create("scratch", &AssistantConfig::default()).await.unwrap();
        assert_eq!(store.name(), "memory");
        assert!(!registry.contains("memory"));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sql_alias_opens_sqlite() {
        let registry = StorageRegistry::with_builtins();
        let config = AssistantConfig::default().with_storage_uri(":memory:");
        let store = registry.create("sql", &config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
    }
}
