use relay_llm::ProviderConfig;
use relay_persist::Ttl;
use serde::{Deserialize, Serialize};

use crate::error::{AssistantError, Result};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Threads live in process memory only, whatever the storage provider says
    Session,
    #[default]
    Persistent,
}

/// Assistant settings; every field has a default so partial files deserialize
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Generation backend name (`openai`, `anthropic` or a custom registration)
    pub provider: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,

    pub memory_type: MemoryType,
    /// Storage adapter name (`memory`, `sqlite`/`sql`, `mongodb` or custom)
    pub storage_provider: String,
    /// File path for sqlite, connection string for mongodb
    pub storage_uri: Option<String>,
    pub storage_database: String,
    /// Seconds since last use before a stored thread expires
    pub ttl: Option<u64>,

    /// Working-set cap
    pub max_threads: usize,
    pub max_function_calls: usize,

    pub restore_handoffs: bool,
    pub handoff_message: String,
    pub error_handoff_message: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: None,
            default_model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: "You are a helpful assistant.".to_string(),
            memory_type: MemoryType::Persistent,
            storage_provider: "memory".to_string(),
            storage_uri: None,
            storage_database: "relay".to_string(),
            ttl: None,
            max_threads: 100,
            max_function_calls: 8,
            restore_handoffs: false,
            handoff_message: "I'm transferring you to a human agent. Someone will be with you shortly."
                .to_string(),
            error_handoff_message:
                "Sorry, something went wrong on our side. A human agent will take over this conversation."
                    .to_string(),
        }
    }
}

impl AssistantConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_storage(mut self, provider: impl Into<String>) -> Self {
        self.storage_provider = provider.into();
        self
    }

    pub fn with_storage_uri(mut self, uri: impl Into<String>) -> Self {
        self.storage_uri = Some(uri.into());
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = Some(secs);
        self
    }

    pub fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    pub fn with_max_function_calls(mut self, max: usize) -> Self {
        self.max_function_calls = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl.map(Ttl::from_secs).unwrap_or_default()
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::new(self.api_key.clone());
        match &self.base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        }
    }

    /// Reject values that would make the assistant unusable
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(AssistantError::Config("max_threads must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AssistantError::Config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(AssistantError::Config("default_model must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AssistantConfig::default();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.memory_type, MemoryType::Persistent);
        assert_eq!(config.storage_provider, "memory");
        assert_eq!(config.max_threads, 100);
        assert_eq!(config.max_function_calls, 8);
        assert_eq!(config.ttl(), Ttl::none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_structure() {
        let toml = r#"
            provider = "anthropic"
            default_model = "claude-3-5-haiku-latest"
            temperature = 0.2
            memory_type = "session"
            storage_provider = "sqlite"
            storage_uri = "threads.db"
            ttl = 3600
            max_threads = 10
        "#;

        let config: AssistantConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.memory_type, MemoryType::Session);
        assert_eq!(config.storage_uri.as_deref(), Some("threads.db"));
        assert_eq!(config.ttl(), Ttl::from_secs(3600));
        assert_eq!(config.max_threads, 10);
        // Untouched fields keep their defaults
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.max_function_calls, 8);
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let config = AssistantConfig::default().with_max_threads(0);
        assert!(matches!(config.validate(), Err(AssistantError::Config(_))));
    }
}
