//! # relay-executor
//!
//! The agent executor: mediates between a streaming language model, the
//! workflow runtime, and task/message protocol clients.
//!
//! - [`llm`] — provider seam: [`llm::LanguageModel`] and the
//!   [`llm::StreamChunk`] token union
//! - [`processor`] — transforms a token stream into protocol events with
//!   ring-buffered delta coalescing
//! - [`handlers`] — workflow dispatch/resume/cancel, AI turns, and message
//!   classification
//! - [`executor`] — the single entry point
//! - [`builder`] — full-stack assembly
//! - [`config`] — layered TOML configuration
//! - [`testing`] — scripted models and sample plugins for tests

pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod llm;
pub mod processor;
pub mod testing;

pub use builder::{Agent, AgentBuilder};
pub use config::AgentConfig;
pub use error::{ExecutorError, Result};
pub use executor::{AgentExecutor, RequestContext, UserMessage};
pub use handlers::{AiHandler, IncomingMessage, MessageHandler, WorkflowHandler};
pub use llm::{ChatRequest, ChunkStream, LanguageModel, ModelError, StreamChunk};
pub use processor::{StreamOutcome, StreamProcessor, StreamScope, StreamStatus};
