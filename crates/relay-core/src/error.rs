use relay_persist::PersistError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    /// Storage adapter or generation backend name that nothing registered
    #[error("Unsupported {kind} provider: {name}")]
    UnsupportedProvider { kind: &'static str, name: String },

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Too many function calls in one ask (limit {0})")]
    TooManyFunctionCalls(usize),

    #[error("Generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    /// The chat is owned by a human operator
    #[error("Chat {0} is in human mode")]
    HumanMode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] PersistError),

    #[error("Middleware {name} failed: {message}")]
    Middleware { name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AssistantError {
    pub(crate) fn unsupported(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnsupportedProvider {
            kind,
            name: name.into(),
        }
    }

    /// Errors raised while producing a reply; these are eligible for the fallback chain
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::Generation(_) | Self::FunctionNotFound(_) | Self::TooManyFunctionCalls(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
