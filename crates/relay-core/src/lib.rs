//! # Relay
//!
//! Chat assistant orchestration: one conversation thread per chat over a
//! pluggable generation backend and storage adapter.
//!
//! - **Ask** through a middleware pipeline, with function calling and fallbacks
//! - **Hand off** chats to human operators and release them back
//! - **Parse** structured `!command key:value` messages against templates
//! - **Dispatch** inbound transport events to the right side
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay_core::{AskOptions, Assistant, AssistantConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AssistantConfig::default()
//!         .with_api_key(std::env::var("OPENAI_API_KEY")?)
//!         .with_storage("sqlite");
//!
//!     let assistant = Assistant::builder().config(config).build().await?;
//!     let reply = assistant.ask("chat-1", "Hello!", AskOptions::default()).await?;
//!     println!("{}", reply);
//!
//!     assistant.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod assistant;
pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod functions;
pub mod handoff;
pub mod locks;
pub mod middleware;
pub mod parser;
pub mod registry;
pub mod stats;
pub mod thread;
pub mod transport;

pub use assistant::{Assistant, HANDOFF_CONTEXT_KEY, RELEASE_CONTEXT_KEY};
pub use builder::AssistantBuilder;
pub use config::{AssistantConfig, MemoryType};
pub use dispatcher::{DispatchKind, DispatchOptions, DispatchResult, Dispatcher};
pub use error::{AssistantError, Result};
pub use functions::{AssistantFunction, FunctionRegistry};
pub use handoff::{
    detect_ai_handoff, detect_user_handoff, AiHandoff, HandoffState, HumanHandlers, HumanReply,
};
pub use locks::ChatLocks;
pub use middleware::{Flow, Middleware, MiddlewareContext, Pipeline};
pub use parser::{
    generate_template, parse_message, FieldSpec, FieldType, FieldValue, MessageTemplate,
    ParsedMessage,
};
pub use registry::{BackendRegistry, StorageRegistry};
pub use stats::UsageStats;
pub use thread::{AskOptions, ReplySource, Thread, ThreadReply, HISTORY_LIMIT};
pub use transport::{Contact, InboundMessage, Transport};

// Re-export the lower layers so callers need a single dependency
pub use relay_llm;
pub use relay_persist;
