//! Tool model, naming rules, and the aggregated tool registry
//!
//! The registry exposes a single name-keyed tool set to the LLM, built
//! from two sources: one dispatch tool per registered workflow plugin, and
//! external tools discovered through [`ToolSource`] implementations (MCP
//! clients live behind that trait). External names must match
//! `^[a-z][a-z0-9_]*__[a-z][a-z0-9_]*$` after canonicalization; duplicates
//! are a configuration error detected at startup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

use crate::runtime::PluginDescriptor;

/// Prefix identifying tools whose execute dispatches a workflow
pub const DISPATCH_TOOL_PREFIX: &str = "dispatch_workflow_";

/// Per-request context injected into tool executors
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Conversation of the calling turn
    pub context_id: String,

    /// Task of the calling turn (the parent of any dispatched child)
    pub task_id: String,
}

/// Errors from tool lookup and execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    Unknown { name: String },

    #[error("tool {name} is not executable")]
    NotExecutable { name: String },

    #[error("tool {name} failed: {error}")]
    Execution { name: String, error: String },

    #[error("tool source {source_name} failed: {error}")]
    Source { source_name: String, error: String },
}

type ToolFuture = BoxFuture<'static, Result<Value, ToolError>>;

/// Executor function of a tool
pub type ToolExecutor = Arc<dyn Fn(Value, ToolInvocation) -> ToolFuture + Send + Sync>;

/// An LLM-invocable function
#[derive(Clone)]
pub struct Tool {
    /// Globally unique name
    pub name: String,

    pub description: String,

    /// JSON-schema of the arguments object
    pub input_schema: Value,

    executor: Option<ToolExecutor>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("executor", &self.executor.as_ref().map(|_| "<function>"))
            .finish()
    }
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Whether this tool dispatches a workflow
    pub fn is_dispatch(&self) -> bool {
        self.name.starts_with(DISPATCH_TOOL_PREFIX)
    }

    pub async fn execute(
        &self,
        args: Value,
        invocation: ToolInvocation,
    ) -> Result<Value, ToolError> {
        let executor = self.executor.as_ref().ok_or_else(|| ToolError::NotExecutable {
            name: self.name.clone(),
        })?;
        executor(args, invocation).await
    }
}

/// Provider of external tools (MCP clients implement this)
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Namespace the source's tools are registered under
    fn server_name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<Tool>, ToolError>;
}

/// Seam through which workflow dispatch tools reach the executor layer,
/// breaking the registry -> handler -> runtime -> registry cycle with an
/// id-based call
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    async fn dispatch_tool(
        &self,
        tool_name: &str,
        args: Value,
        invocation: ToolInvocation,
    ) -> Result<Value, ToolError>;
}

/// Convert hyphens and camelCase to snake_case
pub fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in name.chars() {
        if ch == '-' {
            out.push('_');
            prev_lower_or_digit = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Final-form check for a namespaced external tool name
pub fn is_valid_tool_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*__[a-z][a-z0-9_]*$").expect("valid regex"))
        .is_match(name)
}

/// Registry build failure listing every offending name
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool registry configuration invalid: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },

    #[error(transparent)]
    Source(#[from] ToolError),
}

/// Name-keyed, read-only tool set exposed to the LLM
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    /// Build the registry from workflow plugins and external sources.
    ///
    /// Every problem (duplicate or invalid name) is collected before
    /// failing, so a misconfigured deployment sees the full report.
    pub async fn build(
        plugins: &[PluginDescriptor],
        dispatcher: Arc<dyn WorkflowDispatcher>,
        sources: &[Arc<dyn ToolSource>],
    ) -> Result<Self, RegistryError> {
        let mut tools: HashMap<String, Arc<Tool>> = HashMap::new();
        let mut problems = Vec::new();

        for plugin in plugins {
            let tool = workflow_tool(plugin, dispatcher.clone());
            if tools.contains_key(&tool.name) {
                problems.push(format!(
                    "duplicate tool name {} (plugin {})",
                    tool.name, plugin.id
                ));
                continue;
            }
            tools.insert(tool.name.clone(), Arc::new(tool));
        }

        for source in sources {
            let server = canonicalize(source.server_name());
            for tool in source.list_tools().await? {
                let name = format!("{server}__{}", canonicalize(&tool.name));
                if !is_valid_tool_name(&name) {
                    problems.push(format!(
                        "invalid tool name {name} (source {})",
                        source.server_name()
                    ));
                    continue;
                }
                if tools.contains_key(&name) {
                    problems.push(format!(
                        "duplicate tool name {name} (source {})",
                        source.server_name()
                    ));
                    continue;
                }
                let namespaced = Tool {
                    name: name.clone(),
                    ..tool
                };
                tools.insert(name, Arc::new(namespaced));
            }
        }

        if !problems.is_empty() {
            return Err(RegistryError::Invalid { problems });
        }

        tracing::info!(tools = tools.len(), "tool registry built");
        Ok(Self {
            tools: Arc::new(tools),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    /// Read-only snapshot handed to one LLM request
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<Tool>>> {
        self.tools.clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Build the dispatch tool for one plugin
fn workflow_tool(plugin: &PluginDescriptor, dispatcher: Arc<dyn WorkflowDispatcher>) -> Tool {
    let name = format!("{DISPATCH_TOOL_PREFIX}{}", canonicalize(&plugin.id));
    let description = match &plugin.description {
        Some(text) => format!("Dispatch the {} workflow: {}", plugin.name, text),
        None => format!("Dispatch the {} workflow", plugin.name),
    };
    let input_schema = plugin
        .input_schema
        .clone()
        .unwrap_or_else(|| json!({"type": "object"}));

    let tool_name = name.clone();
    let executor: ToolExecutor = Arc::new(move |args, invocation| {
        let dispatcher = dispatcher.clone();
        let tool_name = tool_name.clone();
        Box::pin(async move { dispatcher.dispatch_tool(&tool_name, args, invocation).await })
    });
    Tool::new(name, description, input_schema).with_executor(executor)
}
