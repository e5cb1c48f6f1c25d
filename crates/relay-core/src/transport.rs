use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Messaging channel the assistant replies through
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;

    async fn get_contact(&self, chat_id: &str) -> Result<Contact>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub display_name: Option<String>,
    pub number: Option<String>,
}

/// Message event delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: String,
    pub text: String,
    /// Sent by this account; ignored by the dispatcher
    #[serde(default)]
    pub from_self: bool,
}

impl InboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            from_self: false,
        }
    }
}
