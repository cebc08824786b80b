//! Agent assembly
//!
//! Wires the shared stores, runtime, handlers, and tool registry into one
//! [`Agent`]. Every dependency is an explicit constructor argument under
//! the hood, so tests can reach each component through the built agent.

use std::sync::Arc;

use relay_core::{EventBusManager, TaskStore};
use relay_runtime::{
    ContextManager, ToolRegistry, ToolSource, WorkflowPlugin, WorkflowRuntime,
};
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::error::{ExecutorError, Result};
use crate::executor::AgentExecutor;
use crate::handlers::{AiHandler, MessageHandler, WorkflowHandler};
use crate::llm::LanguageModel;

/// Builder for a fully wired agent
#[derive(Default)]
pub struct AgentBuilder {
    config: AgentConfig,
    model: Option<Arc<dyn LanguageModel>>,
    plugins: Vec<Arc<dyn WorkflowPlugin>>,
    sources: Vec<Arc<dyn ToolSource>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn WorkflowPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_tool_source(mut self, source: Arc<dyn ToolSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub async fn build(self) -> Result<Agent> {
        let model = self
            .model
            .ok_or_else(|| ExecutorError::Config("a language model is required".to_string()))?;

        let store = Arc::new(TaskStore::new());
        let buses = Arc::new(EventBusManager::new(self.config.bus_capacity()));
        let contexts = Arc::new(ContextManager::new(self.config.context_config()));
        let reaper = contexts.spawn_reaper();

        let runtime = Arc::new(WorkflowRuntime::new(
            store.clone(),
            buses.clone(),
            self.config.runtime_config(),
        ));
        for plugin in self.plugins {
            runtime.register(plugin)?;
        }

        let workflows = Arc::new(WorkflowHandler::new(runtime.clone(), buses.clone()));
        let registry = ToolRegistry::build(
            &runtime.plugin_descriptors(),
            workflows.clone(),
            &self.sources,
        )
        .await
        .map_err(|err| ExecutorError::Config(err.to_string()))?;

        let ai = Arc::new(AiHandler::new(
            model,
            contexts.clone(),
            registry.clone(),
            store.clone(),
            self.config.system_prompt.clone(),
        ));
        let messages = MessageHandler::new(runtime.clone(), workflows.clone(), ai);
        let executor = AgentExecutor::new(contexts.clone(), messages, workflows.clone());

        Ok(Agent {
            store,
            buses,
            contexts,
            runtime,
            workflows,
            registry,
            executor,
            reaper,
        })
    }
}

/// A fully wired agent with its shared components exposed
pub struct Agent {
    pub store: Arc<TaskStore>,
    pub buses: Arc<EventBusManager>,
    pub contexts: Arc<ContextManager>,
    pub runtime: Arc<WorkflowRuntime>,
    pub workflows: Arc<WorkflowHandler>,
    pub registry: ToolRegistry,
    pub executor: AgentExecutor,
    reaper: Option<JoinHandle<()>>,
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}
