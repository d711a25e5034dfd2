pub mod agent;
pub mod api_key;
pub mod error;
pub mod event;
pub mod execution;
pub mod execution_log;
pub mod ids;
pub mod user;
pub mod webhook;
pub mod webhook_delivery;

pub use agent::{Agent, AgentMetrics};
pub use api_key::ApiKey;
pub use error::{ErrorBody, OrchestraError};
pub use event::Event;
pub use execution::{Execution, ExecutionStatus};
pub use execution_log::{ExecutionLog, LogLevel};
pub use ids::{AgentId, ApiKeyId, ExecutionId, ExecutionLogId, UserId, WebhookDeliveryId, WebhookId};
pub use user::{Role, User};
pub use webhook::Webhook;
pub use webhook_delivery::{DeliveryStatus, WebhookDelivery};
