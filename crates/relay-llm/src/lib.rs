pub mod types;
pub mod traits;
pub mod config;
pub mod openai;
pub mod anthropic;

pub use traits::{
    GenerationBackend,
    GenerationRequest, GenerationOptions, Generation,
    TokenUsage,
};

pub use config::ProviderConfig;
pub use openai::OpenAIClient;
pub use anthropic::AnthropicClient;
pub use types::{Message, FunctionCall, FunctionDefinition};
