//! # relay-runtime
//!
//! Workflow plugin runtime for the relay agent:
//!
//! - [`plugin`] / [`yields`] — the bidirectional coroutine model: plugin
//!   bodies yield [`yields::WorkflowYield`] values and receive validated
//!   input back on resume
//! - [`runtime`] — registry, dispatch, pause/resume/cancel, and the
//!   per-execution driver translating yields into protocol events
//! - [`execution`] — live execution handles with the bounded first-yield
//!   dispatch reply
//! - [`schema`] — structured JSON-schema validation for workflow inputs
//! - [`context`] — conversation contexts with history and the inactivity
//!   reaper
//! - [`tools`] — tool model, naming rules, and the aggregated registry

pub mod context;
pub mod error;
pub mod execution;
pub mod plugin;
pub mod runtime;
pub mod schema;
pub mod tools;
pub mod yields;

pub use context::{Context, ContextConfig, ContextEvent, ContextManager};
pub use error::{Result, RuntimeError, WorkflowError};
pub use execution::{ExecutionOutcome, WorkflowExecution};
pub use plugin::{WorkflowContext, WorkflowIo, WorkflowPlugin};
pub use runtime::{
    DispatchRequest, PluginDescriptor, ResumeOutcome, RuntimeConfig, WorkflowRuntime,
};
pub use schema::SchemaError;
pub use tools::{
    canonicalize, is_valid_tool_name, Tool, ToolError, ToolInvocation, ToolRegistry, ToolSource,
    WorkflowDispatcher, DISPATCH_TOOL_PREFIX,
};
pub use yields::{DispatchReply, WorkflowYield};
