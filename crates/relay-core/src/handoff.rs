use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_USER_REASON: &str = "User requested a human agent";
pub const DEFAULT_AI_REASON: &str = "Assistant requested a human agent";
pub const ERROR_REASON: &str = "processing error";

static USER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)#(handoff|human|agent)").expect("Invalid regex"));

static USER_REASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)#(handoff|human|agent)\s+(.+)").expect("Invalid regex"));

static AI_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(handoff|human needed)(\s*:\s*[^\]]*|\s+[^\]]*)?\]").expect("Invalid regex")
});

static AI_REASON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(handoff|human needed)\s*:?\s*([^\]]+)\]").expect("Invalid regex")
});

/// Runtime record of a chat owned by a human operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffState {
    /// Chat id of the owning thread
    pub thread_id: String,
    pub handoff_time: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl HandoffState {
    pub fn new(chat_id: impl Into<String>, reason: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            thread_id: chat_id.into(),
            handoff_time: Utc::now(),
            reason: reason.into(),
            metadata,
        }
    }
}

/// Outcome of handing an inbound message to the human side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanReply {
    /// No handler took the message
    Unhandled,
    Handled { response: Option<String> },
}

impl HumanReply {
    pub fn handled(response: impl Into<String>) -> Self {
        Self::Handled {
            response: Some(response.into()),
        }
    }

    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Handled { response } => response.as_deref(),
            Self::Unhandled => None,
        }
    }
}

/// Callbacks into the operator side; failures are logged, never propagated
#[async_trait]
pub trait HumanHandlers: Send + Sync {
    async fn on_handoff(&self, _chat_id: &str, _state: &HandoffState) -> Result<()> {
        Ok(())
    }

    async fn on_message(&self, _chat_id: &str, _text: &str, _state: &HandoffState) -> Result<HumanReply> {
        Ok(HumanReply::Unhandled)
    }

    async fn on_release(&self, _chat_id: &str, _summary: &str, _state: &HandoffState) -> Result<()> {
        Ok(())
    }
}

/// Reason for a `#handoff`, `#human` or `#agent` request in user text
pub fn detect_user_handoff(text: &str) -> Option<String> {
    if !USER_TAG.is_match(text) {
        return None;
    }

    let reason = USER_REASON
        .captures(text)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_REASON.to_string());

    Some(reason)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiHandoff {
    pub reason: String,
    /// Reply with the tag removed
    pub cleaned: String,
}

/// Find a `[handoff]` / `[human needed: reason]` tag in a model reply
pub fn detect_ai_handoff(text: &str) -> Option<AiHandoff> {
    if !AI_TAG.is_match(text) {
        return None;
    }

    let reason = AI_REASON
        .captures(text)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_AI_REASON.to_string());

    let cleaned = AI_TAG.replace_all(text, "").trim().to_string();

    Some(AiHandoff { reason, cleaned })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_tag_with_reason() {
        assert_eq!(
            detect_user_handoff("#human please help me now").as_deref(),
            Some("please help me now")
        );
        assert_eq!(
            detect_user_handoff("I need an #AGENT   about my invoice").as_deref(),
            Some("about my invoice")
        );
    }

    #[test]
    fn test_user_tag_without_reason() {
        assert_eq!(detect_user_handoff("#handoff").as_deref(), Some(DEFAULT_USER_REASON));
        assert_eq!(detect_user_handoff("talk to a human please"), None);
    }

    #[test]
    fn test_ai_tag_with_reason() {
        let handoff = detect_ai_handoff("Sure! [handoff: billing issue]").unwrap();
        assert_eq!(handoff.reason, "billing issue");
        assert_eq!(handoff.cleaned, "Sure!");
    }

    #[test]
    fn test_ai_tag_variants() {
        let handoff = detect_ai_handoff("[Human Needed] Let me get someone.").unwrap();
        assert_eq!(handoff.reason, DEFAULT_AI_REASON);
        assert_eq!(handoff.cleaned, "Let me get someone.");

        let handoff = detect_ai_handoff("One moment [HANDOFF refund over limit]").unwrap();
        assert_eq!(handoff.reason, "refund over limit");
        assert_eq!(handoff.cleaned, "One moment");

        assert!(detect_ai_handoff("No tags here, [handoffs] aside").is_none());
    }

    #[test]
    fn test_human_reply_response() {
        assert_eq!(HumanReply::handled("on it").response(), Some("on it"));
        assert_eq!(HumanReply::Handled { response: None }.response(), None);
        assert_eq!(HumanReply::Unhandled.response(), None);
    }
}
