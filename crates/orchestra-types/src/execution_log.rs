use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ExecutionId, ExecutionLogId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Ascending severity rank, used to turn a `min_level` filter into a
    /// threshold comparison rather than an exact match.
    pub fn rank(self) -> i16 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
            LogLevel::Fatal => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: ExecutionLogId,
    pub execution_id: ExecutionId,
    /// Monotonically increasing within an execution; callers rely on this
    /// for strict append-order when replaying `GET /executions/{id}/logs`
    /// independent of storage-layer timestamp resolution.
    pub sequence: u64,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(execution_id: ExecutionId, sequence: u64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: ExecutionLogId::new(),
            execution_id,
            sequence,
            level,
            message: message.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }
}
