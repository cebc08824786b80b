//! Language-model seam and the provider stream chunk union
//!
//! The executor is provider-agnostic: concrete SDK bindings implement
//! [`LanguageModel`] and emit [`StreamChunk`] values. The chunk union is
//! tagged kebab-case on the wire (`text-delta`, `reasoning-delta`,
//! `tool-call`, ...); unknown provider chunks are carried through as `raw`
//! and ignored by the stream processor.
//!
//! Tool execution happens inside the provider loop: the model receives the
//! request's tool snapshot, runs tool executors itself, and reports both
//! the `tool-call` and the `tool-result` chunks in the stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use relay_core::ModelMessage;
use relay_runtime::{Tool, ToolInvocation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Provider failure surfaced mid-stream
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ModelError {
    pub message: String,
}

impl ModelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One chunk of a provider token stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    TextDelta {
        delta: String,
    },
    TextEnd,

    ReasoningStart,
    ReasoningDelta {
        delta: String,
    },
    ReasoningEnd,

    /// A complete tool invocation decided by the model
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    /// Incremental tool-argument text while the model is still emitting
    ToolInputDelta {
        id: String,
        delta: String,
    },
    ToolInputEnd {
        id: String,
    },
    /// Result of a provider-executed tool call
    ToolResult {
        id: String,
        name: String,
        result: Value,
    },

    /// Provider-specific chunk carried through verbatim
    Raw {
        #[serde(rename = "rawValue")]
        raw_value: Value,
    },
}

/// Boxed stream of provider chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = std::result::Result<StreamChunk, ModelError>> + Send>>;

/// One streaming chat request
#[derive(Clone)]
pub struct ChatRequest {
    /// Conversation history, oldest first
    pub messages: Vec<ModelMessage>,

    /// Opaque system-prompt slot
    pub system_prompt: Option<String>,

    /// Name-keyed tool snapshot for this request
    pub tools: Arc<HashMap<String, Arc<Tool>>>,

    /// Invocation context injected into tool executors
    pub invocation: ToolInvocation,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.len())
            .field("task_id", &self.invocation.task_id)
            .finish()
    }
}

/// Streaming chat model seam implemented by provider bindings
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream(&self, request: ChatRequest) -> std::result::Result<ChunkStream, ModelError>;
}
