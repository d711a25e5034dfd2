use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{UserId, WebhookId};

/// Trailing-24h failed-delivery count at which a webhook is auto-disabled.
pub const AUTO_DISABLE_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    pub owner: UserId,
    pub url: String,
    /// Shared secret used to HMAC-sign delivery payloads; rotatable via
    /// `rotate_secret`, never returned to clients after creation.
    pub secret: String,
    /// Event-type globs the webhook subscribes to, e.g. `"execution.*"`.
    pub subscribed_events: Vec<String>,
    pub active: bool,
    /// Count of `failed` deliveries for this webhook in the trailing 24h
    /// window, maintained by the store alongside each delivery outcome.
    pub consecutive_failures_window: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn matches(&self, event_type: &str) -> bool {
        self.subscribed_events.iter().any(|pattern| glob_match(pattern, event_type))
    }

    pub fn should_auto_disable(&self) -> bool {
        self.consecutive_failures_window >= AUTO_DISABLE_THRESHOLD
    }
}

/// Minimal `*`-suffix glob matcher for event-type subscriptions
/// (`"execution.*"` matches `"execution.completed"`); patterns without a
/// trailing `*` must match exactly.
fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_pattern_matches_prefix() {
        assert!(glob_match("execution.*", "execution.completed"));
        assert!(!glob_match("execution.*", "webhook.rotated"));
    }

    #[test]
    fn exact_pattern_requires_exact_match() {
        assert!(glob_match("execution.completed", "execution.completed"));
        assert!(!glob_match("execution.completed", "execution.failed"));
    }

    #[test]
    fn auto_disable_trips_at_threshold() {
        let mut webhook = Webhook {
            id: WebhookId::new(),
            owner: UserId::new(),
            url: "https://example.com/hook".into(),
            secret: "s".into(),
            subscribed_events: vec!["execution.*".into()],
            active: true,
            consecutive_failures_window: AUTO_DISABLE_THRESHOLD - 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!webhook.should_auto_disable());
        webhook.consecutive_failures_window += 1;
        assert!(webhook.should_auto_disable());
    }
}
