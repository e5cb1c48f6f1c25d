use serde::{Deserialize, Serialize};
use super::function::FunctionCall;

/// Role-tagged conversation entry (provider-agnostic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// System note (handoff summaries, operator annotations)
    System {
        content: String,
    },

    /// Message written by the chat participant
    #[serde(rename = "user")]
    Human {
        content: String,
    },

    /// Model reply, optionally requesting a function call
    #[serde(rename = "assistant")]
    AI {
        #[serde(default)]
        content: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        function_call: Option<FunctionCall>,
    },

    /// Result of a function the model asked for
    Function {
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System { content: content.into() }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human { content: content.into() }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::AI {
            content: content.into(),
            function_call: None,
        }
    }

    /// AI message that carried a function call alongside its (possibly empty) text
    pub fn ai_with_call(content: impl Into<String>, call: FunctionCall) -> Self {
        Self::AI {
            content: content.into(),
            function_call: Some(call),
        }
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Get role as string
    pub fn role(&self) -> &str {
        match self {
            Self::System { .. } => "system",
            Self::Human { .. } => "user",
            Self::AI { .. } => "assistant",
            Self::Function { .. } => "function",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::Human { content }
            | Self::AI { content, .. }
            | Self::Function { content, .. } => content,
        }
    }
}
