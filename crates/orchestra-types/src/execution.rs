use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, ExecutionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    /// A status from which no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout)
    }

    /// Whether `next` is a legal transition from `self`. `pending -> running
    /// -> {completed, failed, cancelled, timeout}`; `pending -> cancelled` is
    /// also legal (a queued run can be cancelled before it is claimed).
    pub fn can_transition_to(self, next: Self) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, Cancelled) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Cancelled) => true,
            (Running, Timeout) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Lower number dispatches first (high=1, normal=2, low=3).
    pub fn rank(self) -> i16 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduled,
    Webhook,
    Recurring,
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Manual
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub agent_id: AgentId,
    pub submitted_by: UserId,
    pub status: ExecutionStatus,
    pub priority: Priority,
    pub trigger: Trigger,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub environment: String,
    /// Plugin-reported usage; opaque to any engine-level billing logic — the
    /// engine persists whatever a plugin's `execute` result carries and never
    /// recomputes or validates these numbers itself.
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Hostname/process identifier of the worker currently holding the
    /// claim, mirroring the lock-holder column used for webhook delivery
    /// leases so both queues share the same claim-and-lease shape.
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(
        agent_id: AgentId,
        submitted_by: UserId,
        input: Value,
        priority: Priority,
        trigger: Trigger,
        environment: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            agent_id,
            submitted_by,
            status: ExecutionStatus::Pending,
            priority,
            trigger,
            input,
            output: None,
            error: None,
            environment: environment.into(),
            tokens_used: None,
            cost_usd: None,
            metadata: Value::Object(Default::default()),
            idempotency_key,
            attempt: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            locked_by: None,
            locked_until: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionStatus::*;
    use super::*;

    #[test]
    fn pending_can_move_to_running_or_cancelled() {
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn running_can_reach_any_terminal_state() {
        for terminal in [Completed, Failed, Cancelled, Timeout] {
            assert!(Running.can_transition_to(terminal));
        }
    }

    #[test]
    fn terminal_states_accept_no_further_transition() {
        for terminal in [Completed, Failed, Cancelled, Timeout] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Running));
        }
    }

    #[test]
    fn priority_rank_orders_high_first() {
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
    }
}
