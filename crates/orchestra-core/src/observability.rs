//! Thin structured-logging helpers so every engine and dispatcher call site
//! attaches the same identifying fields instead of hand-rolling `tracing`
//! macros with inconsistent field names.

use orchestra_types::ids::{abbrev, AgentId, ExecutionId, WebhookId};

pub fn execution_event(level: tracing::Level, execution_id: ExecutionId, agent_id: AgentId, message: &str) {
    let execution = abbrev(&execution_id.0);
    let agent = abbrev(&agent_id.0);
    match level {
        tracing::Level::ERROR => tracing::error!(execution_id = %execution, agent_id = %agent, "{message}"),
        tracing::Level::WARN => tracing::warn!(execution_id = %execution, agent_id = %agent, "{message}"),
        tracing::Level::DEBUG => tracing::debug!(execution_id = %execution, agent_id = %agent, "{message}"),
        tracing::Level::TRACE => tracing::trace!(execution_id = %execution, agent_id = %agent, "{message}"),
        _ => tracing::info!(execution_id = %execution, agent_id = %agent, "{message}"),
    }
}

pub fn webhook_event(level: tracing::Level, webhook_id: WebhookId, message: &str) {
    let webhook = abbrev(&webhook_id.0);
    match level {
        tracing::Level::ERROR => tracing::error!(webhook_id = %webhook, "{message}"),
        tracing::Level::WARN => tracing::warn!(webhook_id = %webhook, "{message}"),
        _ => tracing::info!(webhook_id = %webhook, "{message}"),
    }
}
