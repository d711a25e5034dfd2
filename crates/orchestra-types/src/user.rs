use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Capabilities are free-form strings; `admin:all` is the universal
/// override checked by every authorization call in the submission gate.
pub const ADMIN_ALL: &str = "admin:all";

/// The capabilities the HTTP surface actually checks against. API keys are
/// issued with an explicit subset of these; a session token always carries
/// `ADMIN_ALL`.
pub const CAP_EXECUTIONS_SUBMIT: &str = "executions:submit";
pub const CAP_EXECUTIONS_READ: &str = "executions:read";
pub const CAP_EXECUTIONS_CANCEL: &str = "executions:cancel";
pub const CAP_WEBHOOKS_MANAGE: &str = "webhooks:manage";

pub fn has_capability(granted: &[String], required: &str) -> bool {
    granted.iter().any(|c| c == ADMIN_ALL || c == required)
}
