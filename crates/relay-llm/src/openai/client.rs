// OpenAI-compatible chat completions backend

use crate::config::ProviderConfig;
use crate::traits::{Generation, GenerationBackend, GenerationRequest, TokenUsage};
use crate::types::{FunctionCall, Message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Map, Value};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI client (HTTP direct, no SDK)
///
/// Works against any server speaking the chat completions protocol
/// (Ollama, vLLM, LM Studio) through `ProviderConfig::base_url`.
pub struct OpenAIClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl OpenAIClient {
    /// Create new client with API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::from_config(&ProviderConfig::new(api_key))
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                    .context("Invalid API key format")?,
            );
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url_or(OPENAI_API_BASE),
        })
    }

    /// Build chat completion request payload
    fn build_request(&self, request: &GenerationRequest) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(convert_messages(&request.messages));

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(request.model));
        payload.insert("messages".to_string(), Value::Array(messages));

        let options = &request.options;
        if let Some(temp) = options.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = options.max_tokens {
            payload.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if !options.functions.is_empty() {
            let tools: Vec<Value> = options
                .functions
                .iter()
                .map(|f| json!({ "type": "function", "function": f }))
                .collect();
            payload.insert("tools".to_string(), Value::Array(tools));
        }

        Value::Object(payload)
    }
}

/// Convert history to OpenAI format.
///
/// History does not keep provider call ids, so each function call gets a
/// positional id and the function result that follows it refers back to it.
fn convert_messages(history: &[Message]) -> Vec<Value> {
    let mut converted = Vec::with_capacity(history.len());
    let mut call_seq = 0usize;
    let mut pending_call: Option<String> = None;

    for message in history {
        match message {
            Message::System { content } => {
                converted.push(json!({ "role": "system", "content": content }));
            }
            Message::Human { content } => {
                converted.push(json!({ "role": "user", "content": content }));
            }
            Message::AI { content, function_call: None } => {
                converted.push(json!({ "role": "assistant", "content": content }));
            }
            Message::AI { content, function_call: Some(call) } => {
                call_seq += 1;
                let id = format!("call_{}", call_seq);
                converted.push(json!({
                    "role": "assistant",
                    "content": if content.is_empty() { Value::Null } else { json!(content) },
                    "tool_calls": [{
                        "id": id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    }],
                }));
                pending_call = Some(id);
            }
            Message::Function { name, content } => match pending_call.take() {
                Some(id) => converted.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": content,
                })),
                // Orphaned result (history was truncated between call and result)
                None => converted.push(json!({
                    "role": "user",
                    "content": format!("Result of function {}: {}", name, content),
                })),
            },
        }
    }

    converted
}

#[async_trait]
impl GenerationBackend for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        let payload = self.build_request(&request);

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, error_text);
        }

        let raw: OpenAIChatResponse = response
            .json()
            .await
            .context("Failed to parse response")?;

        let choice = raw
            .choices
            .into_iter()
            .next()
            .context("OpenAI response contained no choices")?;

        let function_call = choice
            .message
            .tool_calls
            .and_then(|calls| calls.into_iter().next())
            .map(|call| FunctionCall::new(call.function.name, call.function.arguments));

        Ok(Generation {
            content: choice.message.content,
            function_call,
            usage: raw.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }
}

// ============================================================================
// OPENAI-SPECIFIC RESPONSE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
