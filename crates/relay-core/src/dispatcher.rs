use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::assistant::Assistant;
use crate::error::{AssistantError, Result};
use crate::handoff::{detect_ai_handoff, detect_user_handoff, HandoffState, ERROR_REASON};
use crate::parser::{parse_message, MessageTemplate, ParsedMessage};
use crate::thread::AskOptions;
use crate::transport::{InboundMessage, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    /// Chat was already owned by a human
    Human,
    /// This message moved the chat to human mode
    Handoff,
    Ai,
    Template,
    Unmatched,
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub fallback_to_ai: bool,
    /// Turn a failed ask into a handoff instead of an error
    pub handoff_on_error: bool,
    pub templates: Vec<MessageTemplate>,
    pub ai_options: AskOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            fallback_to_ai: true,
            handoff_on_error: false,
            templates: Vec::new(),
            ai_options: AskOptions::default(),
        }
    }
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fallback_to_ai(mut self, enabled: bool) -> Self {
        self.fallback_to_ai = enabled;
        self
    }

    pub fn handoff_on_error(mut self, enabled: bool) -> Self {
        self.handoff_on_error = enabled;
        self
    }

    pub fn template(mut self, template: MessageTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn ai_options(mut self, options: AskOptions) -> Self {
        self.ai_options = options;
        self
    }
}

/// One decision for one inbound message
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub kind: DispatchKind,
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_state: Option<HandoffState>,
    /// Parsed command for `Template`, or the closest failed parse for `Unmatched`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ParsedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    fn new(kind: DispatchKind, response: Option<String>) -> Self {
        Self {
            kind,
            response,
            handoff_state: None,
            data: None,
            error: None,
        }
    }
}

/// Entry point for transport glue: routes each message to the human side,
/// a handoff, a structured template or the assistant
pub struct Dispatcher {
    assistant: Arc<Assistant>,
    transport: Option<Arc<dyn Transport>>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            transport: None,
            options: DispatchOptions::default(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Options used by `handle_event`
    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn assistant(&self) -> &Arc<Assistant> {
        &self.assistant
    }

    pub async fn process_message(
        &self,
        chat_id: &str,
        text: &str,
        options: &DispatchOptions,
    ) -> Result<DispatchResult> {
        if self.assistant.is_in_human_mode(chat_id) {
            return Ok(self.to_human(chat_id, text).await);
        }

        if let Some(reason) = detect_user_handoff(text) {
            let metadata = self.contact_metadata(chat_id).await;
            return self
                .handoff(chat_id, &reason, metadata, self.assistant.config().handoff_message.clone())
                .await;
        }

        let mut closest_parse = None;
        if !options.templates.is_empty() {
            match match_templates(text, &options.templates) {
                Ok(parsed) => {
                    debug!(chat_id, command = ?parsed.command, "Message matched a template");
                    let mut result = DispatchResult::new(DispatchKind::Template, None);
                    result.data = Some(parsed);
                    return Ok(result);
                }
                Err(closest) => closest_parse = closest,
            }
        }

        if !options.fallback_to_ai {
            let mut result = DispatchResult::new(DispatchKind::Unmatched, None);
            result.data = closest_parse;
            return Ok(result);
        }

        match self.assistant.ask(chat_id, text, options.ai_options.clone()).await {
            Ok(reply) => match detect_ai_handoff(&reply) {
                Some(ai_handoff) => {
                    let response = if ai_handoff.cleaned.is_empty() {
                        self.assistant.config().handoff_message.clone()
                    } else {
                        ai_handoff.cleaned
                    };
                    let mut metadata = Map::new();
                    metadata.insert("source".to_string(), json!("assistant"));
                    self.handoff(chat_id, &ai_handoff.reason, metadata, response).await
                }
                None => Ok(DispatchResult::new(DispatchKind::Ai, Some(reply))),
            },
            // A handoff committed while this message waited for the chat
            Err(AssistantError::HumanMode(_)) => {
                debug!(chat_id, "Chat moved to human mode before the ask ran");
                Ok(self.to_human(chat_id, text).await)
            }
            Err(err) if options.handoff_on_error => {
                warn!(chat_id, error = %err, "Ask failed, handing the chat to a human");
                let mut metadata = Map::new();
                metadata.insert("source".to_string(), json!("error"));
                metadata.insert("error".to_string(), json!(err.to_string()));

                let message = self.assistant.config().error_handoff_message.clone();
                let mut result = self.handoff(chat_id, ERROR_REASON, metadata, message).await?;
                result.error = Some(err.to_string());
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    async fn to_human(&self, chat_id: &str, text: &str) -> DispatchResult {
        let reply = self.assistant.route_to_human(chat_id, text).await;
        let response = reply.response().map(str::to_string);
        let mut result = DispatchResult::new(DispatchKind::Human, response);
        result.handoff_state = self.assistant.handoff_state(chat_id);
        result
    }

    async fn handoff(
        &self,
        chat_id: &str,
        reason: &str,
        metadata: Map<String, Value>,
        response: String,
    ) -> Result<DispatchResult> {
        self.assistant.handoff_to_human(chat_id, reason, metadata).await?;

        let mut result = DispatchResult::new(DispatchKind::Handoff, Some(response));
        result.handoff_state = self.assistant.handoff_state(chat_id);
        Ok(result)
    }

    /// Contact details for handoff metadata; empty without a transport
    async fn contact_metadata(&self, chat_id: &str) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!("user"));

        let Some(transport) = &self.transport else {
            return metadata;
        };
        match transport.get_contact(chat_id).await {
            Ok(contact) => {
                if let Some(name) = contact.display_name {
                    metadata.insert("contact_name".to_string(), json!(name));
                }
                if let Some(number) = contact.number {
                    metadata.insert("contact_number".to_string(), json!(number));
                }
            }
            Err(e) => warn!(chat_id, error = %e, "Could not look up contact for handoff"),
        }
        metadata
    }

    /// Dispatch a transport event and send any reply back through it
    ///
    /// Messages sent by this account are ignored.
    pub async fn handle_event(&self, event: &InboundMessage) -> Result<Option<DispatchResult>> {
        if event.from_self {
            return Ok(None);
        }

        let result = self
            .process_message(&event.chat_id, &event.text, &self.options)
            .await?;

        if let (Some(transport), Some(response)) = (&self.transport, &result.response) {
            if let Err(e) = transport.send_message(&event.chat_id, response).await {
                warn!(chat_id = %event.chat_id, error = %e, "Failed to deliver reply");
            }
        }

        info!(chat_id = %event.chat_id, kind = ?result.kind, "Message dispatched");
        Ok(Some(result))
    }
}

/// First valid parse among the templates; otherwise the failed parse of a
/// template pinned to the message's command, if any
fn match_templates(
    text: &str,
    templates: &[MessageTemplate],
) -> std::result::Result<ParsedMessage, Option<ParsedMessage>> {
    let mut closest = None;

    for template in templates {
        let parsed = parse_message(text, template);

        let pinned = template.command.as_deref();
        if pinned.is_some() && pinned != parsed.command.as_deref() {
            continue;
        }
        if parsed.is_valid {
            return Ok(parsed);
        }
        if pinned.is_some() && closest.is_none() {
            closest = Some(parsed);
        }
    }

    Err(closest)
}
