use config::{Config as ConfigLoader, ConfigError, Environment, File};
use relay_core::{AssistantConfig, DispatchOptions, MessageTemplate};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Structured commands tried before the assistant
    #[serde(default)]
    pub templates: Vec<MessageTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub fallback_to_ai: bool,
    pub handoff_on_error: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fallback_to_ai: true,
            handoff_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. RELAY_ variables, `__` between sections (RELAY_ASSISTANT__MAX_THREADS=50)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut cfg: Config = builder.build()?.try_deserialize()?;
        cfg.load_secrets();
        cfg.assistant
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// API keys never live in TOML
    fn load_secrets(&mut self) {
        if !self.assistant.api_key.is_empty() {
            return;
        }
        let provider_var = format!("{}_API_KEY", self.assistant.provider.to_uppercase());
        let key = std::env::var("RELAY_API_KEY").or_else(|_| std::env::var(provider_var));
        if let Ok(key) = key {
            self.assistant.api_key = key;
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        let mut options = DispatchOptions::new()
            .fallback_to_ai(self.dispatch.fallback_to_ai)
            .handoff_on_error(self.dispatch.handoff_on_error);
        for template in &self.templates {
            options = options.template(template.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{FieldType, MemoryType};

    #[test]
    fn test_config_structure() {
        let toml = r#"
            [assistant]
            provider = "anthropic"
            default_model = "claude-3-5-haiku-latest"
            storage_provider = "sqlite"
            storage_uri = "bot.db"
            memory_type = "session"
            ttl = 86400

            [dispatch]
            fallback_to_ai = false
            handoff_on_error = true

            [logging]
            level = "debug"
            format = "json"

            [[templates]]
            command = "track"
            fields = [{ name = "id", type = "string", required = true }]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.assistant.provider, "anthropic");
        assert_eq!(config.assistant.memory_type, MemoryType::Session);
        assert_eq!(config.assistant.ttl, Some(86400));
        assert_eq!(config.assistant.max_threads, 100);
        assert!(config.dispatch.handoff_on_error);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.templates[0].command.as_deref(), Some("track"));
        assert_eq!(
            config.templates[0].field_spec("id").unwrap().field_type,
            FieldType::String
        );

        let options = config.dispatch_options();
        assert!(!options.fallback_to_ai);
        assert_eq!(options.templates.len(), 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.assistant.default_model, "gpt-4o-mini");
        assert!(config.dispatch.fallback_to_ai);
        assert!(!config.dispatch.handoff_on_error);
        assert_eq!(config.logging.level, "info");
        assert!(config.templates.is_empty());
    }

    #[test]
    fn test_shipped_defaults_parse() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.assistant.storage_provider, "sqlite");
        assert!(config.assistant.restore_handoffs);
        assert_eq!(config.templates[0].command.as_deref(), Some("order"));
        assert_eq!(config.templates[0].fields.len(), 2);
    }
}
