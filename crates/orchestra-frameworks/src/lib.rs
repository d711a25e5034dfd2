//! The Framework Contract: a capability interface every pluggable
//! executor implements, and a process-wide registry mapping a framework tag
//! to its plugin. Dispatch is a registry lookup, never a virtual call on a
//! base class — this crate has no dependency on `orchestra-core` or
//! `orchestra-server`, so the engine and the plugins it drives never import
//! each other's crate.

pub mod cerebras;
pub mod echo;
pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orchestra_types::ids::{AgentId, ExecutionId, UserId};
use serde_json::Value;

pub use schema::{ConfigField, ConfigSchema, FieldType};

/// Sink the engine hands a plugin for emitting a log line mid-execution.
/// Plugins are pure with respect to engine state: this and `ProgressSink`
/// are the only channels they may use to report anything back.
pub type LogSink = Arc<dyn Fn(orchestra_types::execution_log::LogLevel, String, Option<Value>) + Send + Sync>;

/// Sink for a progress percentage; the engine clamps to `[0, 100]` before a
/// plugin ever sees the value reflected in an event.
pub type ProgressSink = Arc<dyn Fn(f32) + Send + Sync>;

/// Everything a plugin's `execute` needs, built fresh per dispatch by the
/// engine: the agent's configuration overlaid with any per-run overrides,
/// plus the sinks and cancellation observer the plugin is pure with respect
/// to.
#[derive(Clone)]
pub struct PluginContext {
    pub agent_id: AgentId,
    pub execution_id: ExecutionId,
    pub submitter_id: UserId,
    pub input: Value,
    pub configuration: Value,
    pub environment: String,
    pub log: LogSink,
    pub progress: ProgressSink,
    pub cancelled: tokio_util::sync::CancellationToken,
}

impl PluginContext {
    pub fn log(&self, level: orchestra_types::execution_log::LogLevel, message: impl Into<String>) {
        (self.log)(level, message.into(), None);
    }

    pub fn log_with_meta(&self, level: orchestra_types::execution_log::LogLevel, message: impl Into<String>, meta: Value) {
        (self.log)(level, message.into(), Some(meta));
    }

    /// Clamps to `[0, 100]` per the plugin context invariant
    /// regardless of what a plugin passes in.
    pub fn progress(&self, percent: f32) {
        (self.progress)(percent.clamp(0.0, 100.0));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

/// Successful outcome of `execute`; `tokens_used`/`cost_usd` are whatever
/// the plugin reports and are opaque to any engine-level billing logic.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub output: Value,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// A validation failure surfaced at agent create/update time or again at
/// dispatch, never as a panic.
#[derive(Debug, Clone, thiserror::Error)]
#[error("framework plugin error: {message}")]
pub struct PluginError {
    pub message: String,
    pub logs: Vec<String>,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), logs: Vec::new() }
    }

    pub fn with_logs(message: impl Into<String>, logs: Vec<String>) -> Self {
        Self { message: message.into(), logs }
    }
}

/// The Framework Contract. Plugins are `Send + Sync` capability objects
/// stored behind `Arc<dyn FrameworkPlugin>` in the registry, the same shape
/// the reference backend uses for its provider integrations.
#[async_trait]
pub trait FrameworkPlugin: Send + Sync {
    /// Stable tag this plugin is registered under, e.g. `"echo"`,
    /// `"cerebras"`.
    fn tag(&self) -> &'static str;

    /// Declarative description of the keys this plugin's configuration
    /// accepts; surfaced to callers building an agent and used by UIs to
    /// render a form without hardcoding plugin knowledge.
    fn schema(&self) -> ConfigSchema;

    /// Pure validation of a configuration bag against this plugin's schema.
    /// Called at agent create/update and again at dispatch (configuration
    /// may have been overlaid with per-run overrides since creation).
    fn validate(&self, configuration: &Value) -> Result<(), Vec<String>>;

    /// Invokes the plugin. Implementations must only observe `context` and
    /// emit through its sinks — no hidden engine-state access.
    async fn execute(&self, context: PluginContext) -> Result<ExecutionOutcome, PluginError>;
}

/// Process-wide `framework-tag -> plugin` map, initialized once at boot.
/// Unknown tags are a submission-time `UnsupportedFramework` failure, not a
/// panic.
#[derive(Clone, Default)]
pub struct FrameworkRegistry {
    plugins: HashMap<&'static str, Arc<dyn FrameworkPlugin>>,
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self { plugins: HashMap::new() }
    }

    pub fn register(&mut self, plugin: Arc<dyn FrameworkPlugin>) {
        self.plugins.insert(plugin.tag(), plugin);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn FrameworkPlugin>> {
        self.plugins.get(tag).cloned()
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    /// The registry this process boots with: the deterministic `echo`
    /// plugin used by the seed tests plus the real `cerebras`
    /// chat-completions client.
    pub fn with_builtins(cerebras_api_key: Option<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(echo::EchoPlugin));
        registry.register(Arc::new(cerebras::CerebrasPlugin::new(cerebras_api_key)));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_none() {
        let registry = FrameworkRegistry::with_builtins(None);
        assert!(registry.get("does-not-exist").is_none());
        assert!(registry.get("echo").is_some());
        assert!(registry.get("cerebras").is_some());
    }
}
