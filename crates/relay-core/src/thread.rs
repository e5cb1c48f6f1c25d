use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use relay_llm::{
    Generation, GenerationBackend, GenerationOptions, GenerationRequest, Message, TokenUsage,
};
use relay_persist::{ThreadSnapshot, ThreadStore};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::functions::FunctionRegistry;

/// Maximum number of history entries kept per thread
pub const HISTORY_LIMIT: usize = 20;

/// Per-call overrides for an ask
#[derive(Clone, Default)]
pub struct AskOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Served verbatim when generation fails
    pub fallback_response: Option<String>,
    /// Tried once when generation fails and no fallback response is set
    pub fallback_backend: Option<Arc<dyn GenerationBackend>>,
    /// Ask even if a human owns the chat
    pub skip_human_check: bool,
    /// Deadline for each backend call
    pub timeout: Option<Duration>,
}

impl fmt::Debug for AskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AskOptions")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("fallback_response", &self.fallback_response)
            .field("fallback_backend", &self.fallback_backend.as_ref().map(|b| b.name().to_string()))
            .field("skip_human_check", &self.skip_human_check)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_fallback_response(mut self, response: impl Into<String>) -> Self {
        self.fallback_response = Some(response.into());
        self
    }

    pub fn with_fallback_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.fallback_backend = Some(backend);
        self
    }

    pub fn skip_human_check(mut self) -> Self {
        self.skip_human_check = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Collaborators a thread needs to answer
pub struct GenerationEnv<'a> {
    pub backend: &'a dyn GenerationBackend,
    pub store: &'a dyn ThreadStore,
    pub functions: &'a FunctionRegistry,
    pub config: &'a AssistantConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Backend,
    FallbackResponse,
    FallbackBackend,
}

#[derive(Debug, Clone)]
pub struct ThreadReply {
    pub content: String,
    pub source: ReplySource,
    pub usage: TokenUsage,
    pub function_calls: usize,
}

/// Messages and totals produced while resolving one prompt
#[derive(Default)]
struct Turn {
    messages: Vec<Message>,
    content: String,
    usage: TokenUsage,
    function_calls: usize,
}

impl Turn {
    fn add_usage(&mut self, usage: TokenUsage) {
        self.usage.input_tokens += usage.input_tokens;
        self.usage.output_tokens += usage.output_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }
}

/// One chat's conversation state
#[derive(Debug, Clone)]
pub struct Thread {
    chat_id: String,
    context: BTreeMap<String, Value>,
    history: Vec<Message>,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl Thread {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self::from_snapshot(ThreadSnapshot::new(chat_id))
    }

    pub fn from_snapshot(snapshot: ThreadSnapshot) -> Self {
        let mut thread = Self {
            chat_id: snapshot.chat_id,
            context: snapshot.context,
            history: snapshot.history,
            created_at: snapshot.created_at,
            last_used: snapshot.last_used,
        };
        thread.truncate_history();
        thread
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            chat_id: self.chat_id.clone(),
            context: self.context.clone(),
            history: self.history.clone(),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn remove_context(&mut self, key: &str) -> Option<Value> {
        self.context.remove(key)
    }

    /// Append to history, dropping the oldest entries past the limit
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
        self.truncate_history();
    }

    fn truncate_history(&mut self) {
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Base prompt followed by the context serialized with sorted keys
    pub fn system_prompt(&self, base: &str) -> String {
        if self.context.is_empty() {
            return base.to_string();
        }
        match serde_json::to_string(&self.context) {
            Ok(context) => format!("{}\n\nConversation context: {}", base, context),
            Err(_) => base.to_string(),
        }
    }

    pub async fn persist(&self, store: &dyn ThreadStore) -> Result<()> {
        store.save(&self.snapshot()).await?;
        Ok(())
    }

    /// Record the prompt, generate a reply (resolving function calls), record
    /// the reply and persist
    pub async fn ask(
        &mut self,
        prompt: &str,
        env: &GenerationEnv<'_>,
        options: &AskOptions,
    ) -> Result<ThreadReply> {
        self.last_used = Utc::now();
        self.push(Message::human(prompt));

        let err = match self.generate(env.backend, env, options).await {
            Ok(turn) => return self.finish(turn, ReplySource::Backend, env).await,
            Err(err) if err.is_generation_failure() => err,
            Err(err) => return Err(err),
        };

        if let Some(response) = &options.fallback_response {
            warn!(chat_id = %self.chat_id, error = %err, "Generation failed, serving fallback response");
            return Ok(ThreadReply {
                content: response.clone(),
                source: ReplySource::FallbackResponse,
                usage: TokenUsage::default(),
                function_calls: 0,
            });
        }

        if let Some(fallback) = &options.fallback_backend {
            warn!(
                chat_id = %self.chat_id,
                error = %err,
                backend = fallback.name(),
                "Generation failed, retrying on fallback backend"
            );
            match self.generate(fallback.as_ref(), env, options).await {
                Ok(turn) => return self.finish(turn, ReplySource::FallbackBackend, env).await,
                Err(fallback_err) => {
                    error!(chat_id = %self.chat_id, error = %fallback_err, "Fallback backend failed");
                }
            }
        }

        Err(err)
    }

    async fn finish(
        &mut self,
        turn: Turn,
        source: ReplySource,
        env: &GenerationEnv<'_>,
    ) -> Result<ThreadReply> {
        for message in turn.messages {
            self.push(message);
        }
        self.push(Message::ai(turn.content.clone()));
        self.persist(env.store).await?;

        Ok(ThreadReply {
            content: turn.content,
            source,
            usage: turn.usage,
            function_calls: turn.function_calls,
        })
    }

    async fn generate(
        &self,
        backend: &dyn GenerationBackend,
        env: &GenerationEnv<'_>,
        options: &AskOptions,
    ) -> Result<Turn> {
        let config = env.config;
        let model = options.model.clone().unwrap_or_else(|| config.default_model.clone());
        let system_prompt = self.system_prompt(&config.system_prompt);
        let generation_options = GenerationOptions::new()
            .temperature(options.temperature.unwrap_or(config.temperature))
            .max_tokens(options.max_tokens.unwrap_or(config.max_tokens))
            .functions(env.functions.definitions());

        let mut turn = Turn::default();

        loop {
            let mut messages = self.history.clone();
            messages.extend(turn.messages.iter().cloned());

            let request = GenerationRequest::new(model.clone(), system_prompt.clone(), messages)
                .with_options(generation_options.clone());
            let generation = call_backend(backend, request, options.timeout).await?;

            if let Some(usage) = generation.usage {
                turn.add_usage(usage);
            }

            let Some(call) = generation.function_call else {
                turn.content = generation.content.unwrap_or_default();
                return Ok(turn);
            };

            if turn.function_calls >= config.max_function_calls {
                return Err(AssistantError::TooManyFunctionCalls(config.max_function_calls));
            }

            let function = env
                .functions
                .get(&call.name)
                .ok_or_else(|| AssistantError::FunctionNotFound(call.name.clone()))?;

            debug!(chat_id = %self.chat_id, function = %call.name, "Executing function call");

            let result = match call.arguments_value() {
                Ok(arguments) => match function.call(arguments).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(chat_id = %self.chat_id, function = %call.name, error = %e, "Function failed");
                        json!({ "error": e.to_string() })
                    }
                },
                Err(e) => json!({ "error": format!("Invalid arguments: {}", e) }),
            };

            turn.messages.push(Message::ai_with_call(
                generation.content.unwrap_or_default(),
                call.clone(),
            ));
            turn.messages.push(Message::function_result(call.name, result.to_string()));
            turn.function_calls += 1;
        }
    }
}

async fn call_backend(
    backend: &dyn GenerationBackend,
    request: GenerationRequest,
    timeout: Option<Duration>,
) -> Result<Generation> {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, backend.generate(request))
            .await
            .map_err(|_| {
                AssistantError::Generation(anyhow!(
                    "{} backend timed out after {:?}",
                    backend.name(),
                    limit
                ))
            })?,
        None => backend.generate(request).await,
    };
    result.map_err(AssistantError::Generation)
}
