//! Row shapes returned by `sqlx::query_as`, one per table, with a
//! `TryFrom` into the corresponding `orchestra_types` domain type. Kept
//! separate from the domain types because the wire/domain model uses
//! newtype ids and tagged enums that don't map onto column types directly.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use orchestra_types::agent::{Agent, AgentMetrics};
use orchestra_types::api_key::ApiKey;
use orchestra_types::execution::{Execution, Priority, Trigger};
use orchestra_types::execution_log::{ExecutionLog, LogLevel};
use orchestra_types::ids::{AgentId, ApiKeyId, ExecutionId, ExecutionLogId, UserId, WebhookDeliveryId, WebhookId};
use orchestra_types::user::{Role, User};
use orchestra_types::webhook::Webhook;
use orchestra_types::webhook_delivery::{DeliveryStatus, WebhookDelivery};

use crate::error::{Result, StoreError};

fn bad(field: &'static str, value: impl ToString) -> StoreError {
    StoreError::BadEnumValue { field, value: value.to_string() }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        let role = match row.role.as_str() {
            "user" => Role::User,
            "admin" => Role::Admin,
            other => return Err(bad("role", other)),
        };
        Ok(User {
            id: UserId(row.id),
            email: row.email,
            display_name: row.display_name,
            role,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub owner: Uuid,
    pub hashed_secret: String,
    pub permissions: Vec<String>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: ApiKeyId(row.id),
            owner: UserId(row.owner),
            hashed_secret: row.hashed_secret,
            permissions: row.permissions,
            active: row.active,
            expires_at: row.expires_at,
            usage_count: row.usage_count.max(0) as u64,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AgentRow {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    pub framework: String,
    pub configuration: Value,
    pub tags: Vec<String>,
    pub active: bool,
    pub total_executions: i64,
    pub successful_executions: i64,
    pub avg_duration_ms: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: AgentId(row.id),
            owner: UserId(row.owner),
            name: row.name,
            framework: row.framework,
            configuration: row.configuration,
            tags: row.tags,
            active: row.active,
            metrics: AgentMetrics {
                total_executions: row.total_executions.max(0) as u64,
                successful_executions: row.successful_executions.max(0) as u64,
                avg_duration_ms: row.avg_duration_ms,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub submitted_by: Uuid,
    pub status: String,
    pub priority: String,
    pub trigger: String,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub environment: String,
    pub tokens_used: Option<i64>,
    pub cost_usd: Option<f64>,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        use orchestra_types::execution::ExecutionStatus::*;
        let status = match row.status.as_str() {
            "pending" => Pending,
            "running" => Running,
            "completed" => Completed,
            "failed" => Failed,
            "cancelled" => Cancelled,
            "timeout" => Timeout,
            other => return Err(bad("status", other)),
        };
        let priority = match row.priority.as_str() {
            "low" => Priority::Low,
            "normal" => Priority::Normal,
            "high" => Priority::High,
            other => return Err(bad("priority", other)),
        };
        let trigger = match row.trigger.as_str() {
            "manual" => Trigger::Manual,
            "scheduled" => Trigger::Scheduled,
            "webhook" => Trigger::Webhook,
            "recurring" => Trigger::Recurring,
            other => return Err(bad("trigger", other)),
        };
        Ok(Execution {
            id: ExecutionId(row.id),
            agent_id: AgentId(row.agent_id),
            submitted_by: UserId(row.submitted_by),
            status,
            priority,
            trigger,
            input: row.input,
            output: row.output,
            error: row.error,
            environment: row.environment,
            tokens_used: row.tokens_used.map(|v| v.max(0) as u64),
            cost_usd: row.cost_usd,
            metadata: row.metadata,
            idempotency_key: row.idempotency_key,
            attempt: row.attempt.max(0) as u32,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms.map(|v| v.max(0) as u64),
            locked_by: row.locked_by,
            locked_until: row.locked_until,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ExecutionLogRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub sequence: i64,
    pub level: String,
    pub message: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ExecutionLogRow> for ExecutionLog {
    type Error = StoreError;

    fn try_from(row: ExecutionLogRow) -> Result<Self> {
        let level = match row.level.as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "fatal" => LogLevel::Fatal,
            other => return Err(bad("level", other)),
        };
        Ok(ExecutionLog {
            id: ExecutionLogId(row.id),
            execution_id: ExecutionId(row.execution_id),
            sequence: row.sequence.max(0) as u64,
            level,
            message: row.message,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct WebhookRow {
    pub id: Uuid,
    pub owner: Uuid,
    pub url: String,
    pub secret: String,
    pub subscribed_events: Vec<String>,
    pub active: bool,
    pub consecutive_failures_window: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookRow> for Webhook {
    fn from(row: WebhookRow) -> Self {
        Webhook {
            id: WebhookId(row.id),
            owner: UserId(row.owner),
            url: row.url,
            secret: row.secret,
            subscribed_events: row.subscribed_events,
            active: row.active,
            consecutive_failures_window: row.consecutive_failures_window,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct WebhookDeliveryRow {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: String,
    pub attempt_count: i32,
    pub scheduled_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WebhookDeliveryRow> for WebhookDelivery {
    type Error = StoreError;

    fn try_from(row: WebhookDeliveryRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "pending" => DeliveryStatus::Pending,
            "delivering" => DeliveryStatus::Delivering,
            "delivered" => DeliveryStatus::Delivered,
            "retry" => DeliveryStatus::Retry,
            "failed" => DeliveryStatus::Failed,
            other => return Err(bad("status", other)),
        };
        Ok(WebhookDelivery {
            id: WebhookDeliveryId(row.id),
            webhook_id: WebhookId(row.webhook_id),
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            status,
            attempt_count: row.attempt_count,
            scheduled_at: row.scheduled_at,
            delivered_at: row.delivered_at,
            failed_at: row.failed_at,
            last_status_code: row.last_status_code,
            last_error: row.last_error,
            locked_by: row.locked_by,
            locked_until: row.locked_until,
            created_at: row.created_at,
        })
    }
}

pub fn status_str(status: orchestra_types::execution::ExecutionStatus) -> &'static str {
    use orchestra_types::execution::ExecutionStatus::*;
    match status {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        Timeout => "timeout",
    }
}

pub fn priority_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
    }
}

pub fn trigger_str(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::Manual => "manual",
        Trigger::Scheduled => "scheduled",
        Trigger::Webhook => "webhook",
        Trigger::Recurring => "recurring",
    }
}

pub fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
        LogLevel::Fatal => "fatal",
    }
}

pub fn delivery_status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Delivering => "delivering",
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Retry => "retry",
        DeliveryStatus::Failed => "failed",
    }
}

pub fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Admin => "admin",
    }
}
