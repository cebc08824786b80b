//! Executor-facing handlers wrapping the workflow runtime and the LLM

pub mod ai;
pub mod message;
pub mod workflow;

pub use ai::AiHandler;
pub use message::{IncomingMessage, MessageHandler};
pub use workflow::WorkflowHandler;
