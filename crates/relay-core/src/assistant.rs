use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use relay_llm::{GenerationBackend, Message};
use relay_persist::{ListQuery, ThreadStore};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::builder::AssistantBuilder;
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::functions::FunctionRegistry;
use crate::handoff::{HandoffState, HumanHandlers, HumanReply};
use crate::locks::ChatLocks;
use crate::middleware::{MiddlewareContext, Pipeline};
use crate::stats::{bump, StatsCounters, UsageStats};
use crate::thread::{AskOptions, GenerationEnv, Thread};

/// Thread context key holding the active `HandoffState`
pub const HANDOFF_CONTEXT_KEY: &str = "handoff";
/// Thread context key holding the most recent release summary
pub const RELEASE_CONTEXT_KEY: &str = "last_release";

type SharedThread = Arc<AsyncMutex<Thread>>;

/// Orchestrates threads, middleware and human handoff for many chats
///
/// Every operation that reads, changes and persists a chat's thread holds
/// that chat's lock for its whole duration. Handoff membership lives in
/// memory; the thread context only mirrors it.
pub struct Assistant {
    config: AssistantConfig,
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn ThreadStore>,
    functions: FunctionRegistry,
    pipeline: Pipeline,
    threads: Mutex<HashMap<String, SharedThread>>,
    locks: ChatLocks,
    handoffs: RwLock<HashMap<String, HandoffState>>,
    handlers: RwLock<Option<Arc<dyn HumanHandlers>>>,
    stats: StatsCounters,
}

impl Assistant {
    pub(crate) fn from_parts(
        config: AssistantConfig,
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn ThreadStore>,
        functions: FunctionRegistry,
        pipeline: Pipeline,
        handlers: Option<Arc<dyn HumanHandlers>>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            functions,
            pipeline,
            threads: Mutex::new(HashMap::new()),
            locks: ChatLocks::new(),
            handoffs: RwLock::new(HashMap::new()),
            handlers: RwLock::new(handlers),
            stats: StatsCounters::default(),
        }
    }

    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::new()
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn storage_name(&self) -> &str {
        self.store.name()
    }

    // ---------------------------------------------------------------------
    // Asking
    // ---------------------------------------------------------------------

    /// Answer `prompt` in the chat's thread through the middleware pipeline
    pub async fn ask(&self, chat_id: &str, prompt: &str, options: AskOptions) -> Result<String> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ask", chat_id = %chat_id, run_id = %run_id);

        async move {
            bump(&self.stats.total_asks);
            let result = self.run_ask(chat_id, prompt, options).await;
            match &result {
                Ok(_) => bump(&self.stats.successful_asks),
                Err(e) => {
                    bump(&self.stats.failed_asks);
                    warn!(error = %e, "Ask failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_ask(&self, chat_id: &str, prompt: &str, options: AskOptions) -> Result<String> {
        let _permit = self.locks.acquire(chat_id).await;

        if !options.skip_human_check && self.is_in_human_mode(chat_id) {
            return Err(AssistantError::HumanMode(chat_id.to_string()));
        }

        let shared = self.load_thread(chat_id).await?;
        let mut thread = shared.lock().await;

        let mut ctx = MiddlewareContext {
            chat_id: chat_id.to_string(),
            prompt: prompt.to_string(),
            options,
            response: None,
            thread: &mut *thread,
            error: None,
        };

        let entered = self.pipeline.run_before(&mut ctx).await?;

        if ctx.response.is_some() {
            debug!("Middleware answered without calling the backend");
            bump(&self.stats.middleware_responses);
        } else {
            let env = GenerationEnv {
                backend: self.backend.as_ref(),
                store: self.store.as_ref(),
                functions: &self.functions,
                config: &self.config,
            };
            let prompt = ctx.prompt.clone();
            let options = ctx.options.clone();

            match ctx.thread.ask(&prompt, &env, &options).await {
                Ok(reply) => {
                    self.stats.record_reply(&reply);
                    ctx.response = Some(reply.content);
                }
                Err(err) => {
                    ctx.error = Some(err.to_string());
                    if let Err(after_err) = self.pipeline.run_after(&mut ctx, entered).await {
                        warn!(error = %after_err, "Middleware failed while unwinding a failed ask");
                    }
                    return Err(err);
                }
            }
        }

        self.pipeline.run_after(&mut ctx, entered).await?;
        Ok(ctx.response.unwrap_or_default())
    }

    // ---------------------------------------------------------------------
    // Working set
    // ---------------------------------------------------------------------

    /// Working-set thread for `chat_id`, loading or creating it
    ///
    /// Caller must hold the chat's lock.
    async fn load_thread(&self, chat_id: &str) -> Result<SharedThread> {
        let cached = self.threads.lock().get(chat_id).cloned();
        if let Some(shared) = cached {
            return Ok(shared);
        }

        let thread = match self.store.get(chat_id).await? {
            Some(snapshot) => {
                debug!(chat_id, "Loaded thread from storage");
                Thread::from_snapshot(snapshot)
            }
            None => Thread::new(chat_id),
        };

        let shared = Arc::new(AsyncMutex::new(thread));
        self.threads.lock().insert(chat_id.to_string(), shared.clone());
        self.evict_excess(chat_id).await;

        Ok(shared)
    }

    /// Persist and drop least recently used threads until the working set
    /// fits `max_threads`; chats that are busy and `current` are never evicted
    async fn evict_excess(&self, current: &str) {
        loop {
            let mut candidates: Vec<(String, DateTime<Utc>)> = {
                let threads = self.threads.lock();
                if threads.len() <= self.config.max_threads {
                    return;
                }
                threads
                    .iter()
                    .filter(|(chat_id, _)| chat_id.as_str() != current)
                    .filter_map(|(chat_id, shared)| {
                        let last_used = shared.try_lock().ok()?.last_used();
                        Some((chat_id.clone(), last_used))
                    })
                    .collect()
            };
            candidates.sort_by(|a, b| a.1.cmp(&b.1));

            let mut evicted = false;
            for (chat_id, _) in candidates {
                if self.evict(&chat_id).await {
                    evicted = true;
                    break;
                }
            }

            if !evicted {
                warn!(
                    max_threads = self.config.max_threads,
                    "Working set over capacity and no thread could be evicted"
                );
                return;
            }
        }
    }

    async fn evict(&self, chat_id: &str) -> bool {
        let Some(permit) = self.locks.try_acquire(chat_id) else {
            return false;
        };
        let shared = self.threads.lock().get(chat_id).cloned();
        let Some(shared) = shared else {
            return false;
        };

        let snapshot = shared.lock().await.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            error!(chat_id, error = %e, "Failed to persist thread for eviction, keeping it");
            return false;
        }

        self.threads.lock().remove(chat_id);
        drop(permit);
        self.locks.forget(chat_id);
        bump(&self.stats.evictions);
        debug!(chat_id, "Evicted thread from working set");
        true
    }

    pub fn active_threads(&self) -> usize {
        self.threads.lock().len()
    }

    /// Chats with a live lock entry; bounded by the working set plus busy chats
    pub fn tracked_chats(&self) -> usize {
        self.locks.chat_count()
    }

    /// Whether the chat's thread is currently in the working set
    pub fn is_loaded(&self, chat_id: &str) -> bool {
        self.threads.lock().contains_key(chat_id)
    }

    // ---------------------------------------------------------------------
    // Context and lifecycle
    // ---------------------------------------------------------------------

    pub async fn set_context(&self, chat_id: &str, key: &str, value: Value) -> Result<()> {
        let _permit = self.locks.acquire(chat_id).await;
        let shared = self.load_thread(chat_id).await?;
        let mut thread = shared.lock().await;
        thread.set_context(key, value);
        thread.persist(self.store.as_ref()).await
    }

    pub async fn context(&self, chat_id: &str) -> Result<BTreeMap<String, Value>> {
        let _permit = self.locks.acquire(chat_id).await;
        let shared = self.load_thread(chat_id).await?;
        let thread = shared.lock().await;
        Ok(thread.context().clone())
    }

    pub async fn history(&self, chat_id: &str) -> Result<Vec<Message>> {
        let _permit = self.locks.acquire(chat_id).await;
        let shared = self.load_thread(chat_id).await?;
        let thread = shared.lock().await;
        Ok(thread.history().to_vec())
    }

    /// Remove the chat everywhere: working set, handoff set and storage
    pub async fn delete_thread(&self, chat_id: &str) -> Result<bool> {
        let deleted = {
            let _permit = self.locks.acquire(chat_id).await;
            let in_memory = self.threads.lock().remove(chat_id).is_some();
            self.handoffs.write().remove(chat_id);
            let stored = self.store.delete(chat_id).await?;
            in_memory || stored
        };
        self.locks.prune_idle();
        info!(chat_id, deleted, "Thread deleted");
        Ok(deleted)
    }

    pub fn stats(&self) -> UsageStats {
        let human_mode = self.handoffs.read().len();
        self.stats.snapshot(self.active_threads(), human_mode)
    }

    /// Persist every working-set thread, then close storage
    pub async fn shutdown(&self) -> Result<()> {
        let entries: Vec<(String, SharedThread)> = self
            .threads
            .lock()
            .iter()
            .map(|(chat_id, shared)| (chat_id.clone(), shared.clone()))
            .collect();

        let mut first_error = None;
        for (chat_id, shared) in entries {
            let _permit = self.locks.acquire(&chat_id).await;
            let snapshot = shared.lock().await.snapshot();
            if let Err(e) = self.store.save(&snapshot).await {
                error!(chat_id = %chat_id, error = %e, "Failed to flush thread on shutdown");
                first_error.get_or_insert(e);
            }
        }

        self.store.close().await?;
        info!("Assistant shut down");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // Handoff state machine
    // ---------------------------------------------------------------------

    /// Put the chat in human mode, replacing any earlier handoff state
    pub async fn handoff_to_human(
        &self,
        chat_id: &str,
        reason: &str,
        metadata: Map<String, Value>,
    ) -> Result<bool> {
        let state = HandoffState::new(chat_id, reason, metadata);

        {
            let _permit = self.locks.acquire(chat_id).await;
            let shared = self.load_thread(chat_id).await?;
            let mut thread = shared.lock().await;

            match serde_json::to_value(&state) {
                Ok(value) => thread.set_context(HANDOFF_CONTEXT_KEY, value),
                Err(e) => warn!(chat_id, error = %e, "Could not record handoff in thread context"),
            }
            if let Err(e) = thread.persist(self.store.as_ref()).await {
                error!(chat_id, error = %e, "Failed to persist handoff");
            }

            self.handoffs.write().insert(chat_id.to_string(), state.clone());
        }

        bump(&self.stats.handoffs);
        info!(chat_id, reason, "Chat handed off to a human agent");

        if let Some(handlers) = self.human_handlers() {
            if let Err(e) = handlers.on_handoff(chat_id, &state).await {
                error!(chat_id, error = %e, "Handoff handler failed");
            }
        }

        Ok(true)
    }

    /// Return the chat to the assistant; `false` if it was not in human mode
    pub async fn release_to_ai(
        &self,
        chat_id: &str,
        summary: &str,
        metadata: Map<String, Value>,
    ) -> Result<bool> {
        let released = {
            let _permit = self.locks.acquire(chat_id).await;
            if !self.is_in_human_mode(chat_id) {
                None
            } else {
                self.release_locked(chat_id, summary, &metadata).await?
            }
        };
        let Some(state) = released else {
            if !self.is_loaded(chat_id) {
                self.locks.forget(chat_id);
            }
            return Ok(false);
        };

        bump(&self.stats.releases);
        info!(chat_id, "Chat released back to the assistant");

        if let Some(handlers) = self.human_handlers() {
            if let Err(e) = handlers.on_release(chat_id, summary, &state).await {
                error!(chat_id, error = %e, "Release handler failed");
            }
        }

        Ok(true)
    }

    /// Caller must hold the chat's lock
    async fn release_locked(
        &self,
        chat_id: &str,
        summary: &str,
        metadata: &Map<String, Value>,
    ) -> Result<Option<HandoffState>> {
        let shared = self.load_thread(chat_id).await?;
        let Some(state) = self.handoffs.write().remove(chat_id) else {
            return Ok(None);
        };

        let mut thread = shared.lock().await;
        thread.remove_context(HANDOFF_CONTEXT_KEY);
        thread.push(Message::system(format!(
            "A human agent handled this conversation and returned it. Summary: {}",
            summary
        )));
        thread.set_context(
            RELEASE_CONTEXT_KEY,
            json!({
                "summary": summary,
                "metadata": metadata,
                "reason": state.reason,
                "released_at": Utc::now(),
            }),
        );
        if let Err(e) = thread.persist(self.store.as_ref()).await {
            error!(chat_id, error = %e, "Failed to persist release");
        }

        Ok(Some(state))
    }

    pub fn is_in_human_mode(&self, chat_id: &str) -> bool {
        self.handoffs.read().contains_key(chat_id)
    }

    pub fn handoff_state(&self, chat_id: &str) -> Option<HandoffState> {
        self.handoffs.read().get(chat_id).cloned()
    }

    /// Chats currently owned by a human, oldest handoff first
    pub fn human_mode_chats(&self) -> Vec<HandoffState> {
        let mut chats: Vec<HandoffState> = self.handoffs.read().values().cloned().collect();
        chats.sort_by(|a, b| a.handoff_time.cmp(&b.handoff_time));
        chats
    }

    pub fn register_human_handlers(&self, handlers: Arc<dyn HumanHandlers>) {
        *self.handlers.write() = Some(handlers);
    }

    fn human_handlers(&self) -> Option<Arc<dyn HumanHandlers>> {
        self.handlers.read().clone()
    }

    /// Hand an inbound message of a human-mode chat to the operator side
    pub async fn route_to_human(&self, chat_id: &str, text: &str) -> HumanReply {
        let (Some(handlers), Some(state)) = (self.human_handlers(), self.handoff_state(chat_id)) else {
            return HumanReply::Unhandled;
        };

        match handlers.on_message(chat_id, text, &state).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(chat_id, error = %e, "Human message handler failed");
                HumanReply::Handled { response: None }
            }
        }
    }

    /// Rebuild human-mode membership from handoffs recorded in stored threads
    pub async fn restore_handoffs(&self) -> Result<usize> {
        let snapshots = self.store.list_all(ListQuery::new()).await?;
        let mut restored = 0;

        for snapshot in snapshots {
            let Some(value) = snapshot.context.get(HANDOFF_CONTEXT_KEY) else {
                continue;
            };
            match serde_json::from_value::<HandoffState>(value.clone()) {
                Ok(state) => {
                    let _permit = self.locks.acquire(&snapshot.chat_id).await;
                    self.handoffs.write().insert(snapshot.chat_id.clone(), state);
                    restored += 1;
                }
                Err(e) => {
                    warn!(chat_id = %snapshot.chat_id, error = %e, "Ignoring unreadable handoff record");
                }
            }
        }

        self.locks.prune_idle();
        info!(restored, "Restored human-mode chats from storage");
        Ok(restored)
    }
}
