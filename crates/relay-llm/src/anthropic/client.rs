// Anthropic Messages API backend
//
// System prompt goes in the top-level `system` field; function definitions
// become `tools` and a `tool_use` block in the reply becomes a FunctionCall.

use crate::config::ProviderConfig;
use crate::traits::{Generation, GenerationBackend, GenerationRequest, TokenUsage};
use crate::types::{FunctionCall, Message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::from_config(&ProviderConfig::new(api_key))
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url_or(ANTHROPIC_API_BASE),
            api_key: config.api_key.clone(),
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "system": request.system_prompt,
            "messages": convert_messages(&request.messages),
            "max_tokens": request.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if let Some(temp) = request.options.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.options.functions.is_empty() {
            let tools: Vec<Value> = request
                .options
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "description": f.description.clone().unwrap_or_default(),
                        "input_schema": f.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

/// Anthropic only accepts user/assistant turns, so system notes and function
/// traffic are rendered as text on the matching side of the conversation.
fn convert_messages(history: &[Message]) -> Vec<Value> {
    let mut converted: Vec<Value> = Vec::with_capacity(history.len());

    for message in history {
        let (role, text) = match message {
            Message::System { content } => ("user", format!("[system] {}", content)),
            Message::Human { content } => ("user", content.clone()),
            Message::AI { content, function_call: None } => ("assistant", content.clone()),
            Message::AI { content, function_call: Some(call) } => (
                "assistant",
                format!("{}\n[called {} with {}]", content, call.name, call.arguments)
                    .trim()
                    .to_string(),
            ),
            Message::Function { name, content } => {
                ("user", format!("Result of function {}: {}", name, content))
            }
        };

        // Consecutive turns from the same side are merged
        match converted.last_mut() {
            Some(last) if last["role"] == role => {
                let merged = format!("{}\n\n{}", last["content"].as_str().unwrap_or_default(), text);
                last["content"] = json!(merged);
            }
            _ => converted.push(json!({ "role": role, "content": text })),
        }
    }

    // The Messages API rejects a conversation that opens with an assistant turn,
    // which history trimming can produce
    let first_user = converted
        .iter()
        .position(|turn| turn["role"] == "user")
        .unwrap_or(converted.len());
    converted.drain(..first_user);

    converted
}

#[async_trait]
impl GenerationBackend for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        let payload = self.build_request(&request);

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error ({}): {}", status, error_text);
        }

        let raw: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse response")?;

        let mut text = String::new();
        let mut function_call = None;
        for block in raw.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { name, input } if function_call.is_none() => {
                    function_call = Some(FunctionCall::new(name, input.to_string()));
                }
                _ => {}
            }
        }

        Ok(Generation {
            content: if text.is_empty() { None } else { Some(text) },
            function_call,
            usage: raw.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            finish_reason: raw.stop_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
