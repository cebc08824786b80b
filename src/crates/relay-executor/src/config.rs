//! Layered agent configuration
//!
//! Serde-backed TOML configuration with defaults for every field. Loading
//! starts from defaults and merges any file found on top; merging is
//! whole-section replacement, with serde filling defaults for missing
//! fields.

use std::path::Path;
use std::time::Duration;

use relay_runtime::{ContextConfig, RuntimeConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, Result};

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub runtime: RuntimeSection,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub context: ContextSection,

    /// System-prompt slot handed to the model on every turn
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Bound on the wait for a dispatched workflow's first yield
    pub dispatch_response_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            dispatch_response_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Per-subscriber event channel capacity
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// Delete contexts idle longer than this; unset disables the reaper
    pub max_inactivity_minutes: Option<u64>,

    /// How often the reaper sweeps, in seconds
    pub reap_interval_secs: u64,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_inactivity_minutes: None,
            reap_interval_secs: 60,
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| ExecutorError::Config(err.to_string()))
    }

    /// Load from a TOML file, falling back to defaults when it is absent
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let mut config = Self::default();
                config.merge(Self::from_toml_str(&raw)?);
                tracing::debug!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Err(_) => {
                tracing::debug!(path = %path.display(), "configuration file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Replace sections with another config's sections
    pub fn merge(&mut self, other: AgentConfig) {
        self.runtime = other.runtime;
        self.bus = other.bus;
        self.context = other.context;
        if other.system_prompt.is_some() {
            self.system_prompt = other.system_prompt;
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            dispatch_response_timeout: Duration::from_millis(
                self.runtime.dispatch_response_timeout_ms,
            ),
        }
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            max_inactivity_minutes: self.context.max_inactivity_minutes,
            reap_interval: Duration::from_secs(self.context.reap_interval_secs),
        }
    }

    pub fn bus_capacity(&self) -> usize {
        self.bus.capacity
    }
}
