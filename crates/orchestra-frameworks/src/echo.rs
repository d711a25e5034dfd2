//! Deterministic, no-network plugin. Exists so the seed scenarios of the
//! engine (submit -> complete, submit -> cancel, single-flight-per-agent)
//! can be exercised without a real model endpoint.

use async_trait::async_trait;
use orchestra_types::execution_log::LogLevel;
use serde_json::{json, Value};

use crate::{ConfigSchema, ExecutionOutcome, FrameworkPlugin, PluginContext, PluginError};

pub struct EchoPlugin;

#[async_trait]
impl FrameworkPlugin for EchoPlugin {
    fn tag(&self) -> &'static str {
        "echo"
    }

    fn schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    fn validate(&self, _configuration: &Value) -> Result<(), Vec<String>> {
        Ok(())
    }

    async fn execute(&self, context: PluginContext) -> Result<ExecutionOutcome, PluginError> {
        context.log(LogLevel::Info, "echo: received input");
        context.progress(50.0);

        if context.is_cancelled() {
            return Err(PluginError::new("cancelled before echo completed"));
        }

        context.log(LogLevel::Info, "echo: returning input unchanged");
        context.progress(100.0);

        Ok(ExecutionOutcome {
            output: json!({ "content": context.input }),
            tokens_used: Some(0),
            cost_usd: Some(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_types::ids::{AgentId, ExecutionId, UserId};
    use std::sync::{Arc, Mutex};

    fn context(input: Value) -> (PluginContext, Arc<Mutex<Vec<String>>>) {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let logs_clone = logs.clone();
        let ctx = PluginContext {
            agent_id: AgentId::new(),
            execution_id: ExecutionId::new(),
            submitter_id: UserId::new(),
            input,
            configuration: json!({}),
            environment: "test".to_string(),
            log: Arc::new(move |_level, message, _meta| logs_clone.lock().unwrap().push(message)),
            progress: Arc::new(|_pct| {}),
            cancelled: tokio_util::sync::CancellationToken::new(),
        };
        (ctx, logs)
    }

    #[tokio::test]
    async fn echoes_input_back() {
        let (ctx, logs) = context(json!({"hello": "world"}));
        let outcome = EchoPlugin.execute(ctx).await.unwrap();
        assert_eq!(outcome.output, json!({"content": {"hello": "world"}}));
        assert_eq!(logs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let (mut ctx, _logs) = context(json!({}));
        ctx.cancelled.cancel();
        let result = EchoPlugin.execute(ctx).await;
        assert!(result.is_err());
    }
}
