use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{WebhookDeliveryId, WebhookId};

/// Hard cap on delivery attempts before a delivery is abandoned as failed.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 5;

/// Cap on the exponential backoff between delivery attempts.
pub const MAX_BACKOFF_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: WebhookDeliveryId,
    pub webhook_id: WebhookId,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: DeliveryStatus,
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

impl WebhookDelivery {
    pub fn new(webhook_id: WebhookId, event_id: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: WebhookDeliveryId::new(),
            webhook_id,
            event_id: event_id.into(),
            event_type: event_type.into(),
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            scheduled_at: now,
            delivered_at: None,
            failed_at: None,
            last_status_code: None,
            last_error: None,
            locked_by: None,
            locked_until: None,
            created_at: now,
        }
    }

    /// Seconds to wait before the next attempt: `2^attemptCount · 1s`
    /// (2, 4, 8, 16, 32s for attempts 1..5), capped at `MAX_BACKOFF_SECS`.
    pub fn backoff_secs(attempt_count: i32) -> i64 {
        2i64.saturating_pow(attempt_count.max(0) as u32).min(MAX_BACKOFF_SECS)
    }

    pub fn exhausted(&self) -> bool {
        self.attempt_count >= MAX_DELIVERY_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_the_2_4_8_16_32_progression() {
        assert_eq!(WebhookDelivery::backoff_secs(1), 2);
        assert_eq!(WebhookDelivery::backoff_secs(2), 4);
        assert_eq!(WebhookDelivery::backoff_secs(3), 8);
        assert_eq!(WebhookDelivery::backoff_secs(4), 16);
        assert_eq!(WebhookDelivery::backoff_secs(5), 32);
    }

    #[test]
    fn exhausted_at_max_attempts() {
        let mut delivery = WebhookDelivery::new(WebhookId::new(), "evt_1", "execution.completed", Value::Null);
        delivery.attempt_count = MAX_DELIVERY_ATTEMPTS - 1;
        assert!(!delivery.exhausted());
        delivery.attempt_count = MAX_DELIVERY_ATTEMPTS;
        assert!(delivery.exhausted());
    }
}
