use crate::types::{FunctionCall, FunctionDefinition, Message};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for completion backends (OpenAI, Anthropic, local servers)
///
/// A backend receives the system prompt and the conversation so far and
/// returns either text or a request to call one of the advertised functions.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short identifier used in logs and registries
    fn name(&self) -> &str;

    /// Non-streaming completion
    async fn generate(&self, request: GenerationRequest) -> Result<Generation>;
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            messages,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub functions: Vec<FunctionDefinition>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn functions(mut self, functions: Vec<FunctionDefinition>) -> Self {
        self.functions = functions;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

impl Generation {
    /// Plain text completion
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Completion that asks for a function call
    pub fn call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            function_call: Some(FunctionCall::new(name, arguments)),
            finish_reason: Some("function_call".to_string()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}
