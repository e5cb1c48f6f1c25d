#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::relay_llm::{Generation, GenerationBackend, GenerationRequest, TokenUsage};
use relay_core::relay_persist::MemoryStore;
use relay_core::{
    Assistant, AssistantConfig, Contact, HandoffState, HumanHandlers, HumanReply, Transport,
};

#[derive(Clone)]
pub enum Step {
    Reply(Generation),
    Fail(String),
}

/// Backend that plays a script of replies, then a default step forever
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Step>>,
    default: Mutex<Step>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            name: "scripted".to_string(),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(Step::Reply(Generation::text("ok"))),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn then_text(self, text: &str) -> Self {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        self.script
            .lock()
            .push_back(Step::Reply(Generation::text(text).with_usage(usage)));
        self
    }

    pub fn then_call(self, name: &str, arguments: &str) -> Self {
        self.script
            .lock()
            .push_back(Step::Reply(Generation::call(name, arguments)));
        self
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.script.lock().push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn always_text(self, text: &str) -> Self {
        *self.default.lock() = Step::Reply(Generation::text(text));
        self
    }

    pub fn always_call(self, name: &str, arguments: &str) -> Self {
        *self.default.lock() = Step::Reply(Generation::call(name, arguments));
        self
    }

    pub fn always_fail(self, message: &str) -> Self {
        *self.default.lock() = Step::Fail(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = {
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.default.lock().clone())
        };
        match step {
            Step::Reply(generation) => Ok(generation),
            Step::Fail(message) => Err(anyhow!(message)),
        }
    }
}

pub async fn assistant_with(
    backend: Arc<ScriptedBackend>,
    config: AssistantConfig,
) -> (Arc<Assistant>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let assistant = Assistant::builder()
        .config(config)
        .backend(backend)
        .store(store.clone())
        .build()
        .await
        .unwrap();
    (Arc::new(assistant), store)
}

/// Records every handler call; optionally fails them all
#[derive(Default)]
pub struct RecordingHandlers {
    pub events: Mutex<Vec<String>>,
    pub reply: Option<String>,
    pub fail: bool,
}

impl RecordingHandlers {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl HumanHandlers for RecordingHandlers {
    async fn on_handoff(&self, chat_id: &str, state: &HandoffState) -> Result<()> {
        self.events
            .lock()
            .push(format!("handoff:{}:{}", chat_id, state.reason));
        if self.fail {
            return Err(anyhow!("operator dashboard offline"));
        }
        Ok(())
    }

    async fn on_message(&self, chat_id: &str, text: &str, _state: &HandoffState) -> Result<HumanReply> {
        self.events.lock().push(format!("message:{}:{}", chat_id, text));
        if self.fail {
            return Err(anyhow!("operator dashboard offline"));
        }
        Ok(match &self.reply {
            Some(reply) => HumanReply::handled(reply.clone()),
            None => HumanReply::Handled { response: None },
        })
    }

    async fn on_release(&self, chat_id: &str, summary: &str, _state: &HandoffState) -> Result<()> {
        self.events
            .lock()
            .push(format!("release:{}:{}", chat_id, summary));
        if self.fail {
            return Err(anyhow!("operator dashboard offline"));
        }
        Ok(())
    }
}

/// Transport that stores outgoing messages
#[derive(Default)]
pub struct MemoryTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    pub contact: Contact,
}

impl MemoryTransport {
    pub fn with_contact(name: &str, number: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            contact: Contact {
                display_name: Some(name.to_string()),
                number: Some(number.to_string()),
            },
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn get_contact(&self, _chat_id: &str) -> Result<Contact> {
        Ok(self.contact.clone())
    }
}
