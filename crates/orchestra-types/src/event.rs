use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::ExecutionStatus;
use crate::execution_log::LogLevel;
use crate::ids::ExecutionId;

/// The one shape every subscriber of the event bus sees, whether it arrives
/// over SSE, a WebSocket, or as a webhook payload. Tagged on `type` so wire
/// consumers can discriminate without a schema registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Started {
        execution_id: ExecutionId,
        at: DateTime<Utc>,
    },
    Log {
        execution_id: ExecutionId,
        level: LogLevel,
        message: String,
        sequence: u64,
    },
    Progress {
        execution_id: ExecutionId,
        message: String,
        percent: Option<f32>,
    },
    State {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
    Completed {
        execution_id: ExecutionId,
        output: Value,
        cost: Option<Value>,
    },
    Failed {
        execution_id: ExecutionId,
        error: String,
    },
    Cancelled {
        execution_id: ExecutionId,
    },
}

impl Event {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Event::Started { execution_id, .. }
            | Event::Log { execution_id, .. }
            | Event::Progress { execution_id, .. }
            | Event::State { execution_id, .. }
            | Event::Completed { execution_id, .. }
            | Event::Failed { execution_id, .. }
            | Event::Cancelled { execution_id } => *execution_id,
        }
    }

    /// Dotted name used as the webhook `event_type` and SSE `event:` field,
    /// e.g. `"execution.completed"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Started { .. } => "execution.started",
            Event::Log { .. } => "execution.log",
            Event::Progress { .. } => "execution.progress",
            Event::State { .. } => "execution.state",
            Event::Completed { .. } => "execution.completed",
            Event::Failed { .. } => "execution.failed",
            Event::Cancelled { .. } => "execution.cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Completed { .. } | Event::Failed { .. } | Event::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_matches_webhook_event_type_convention() {
        let event = Event::Completed { execution_id: ExecutionId::new(), output: Value::Null, cost: None };
        assert_eq!(event.type_name(), "execution.completed");
        assert!(event.is_terminal());
    }

    #[test]
    fn non_terminal_events_are_not_terminal() {
        let event = Event::Progress { execution_id: ExecutionId::new(), message: "working".into(), percent: None };
        assert!(!event.is_terminal());
    }
}
