pub mod message;
pub mod function;

pub use message::Message;
pub use function::{FunctionCall, FunctionDefinition};
