use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrchestraError;
use crate::ids::{AgentId, UserId};

/// Upper bound on the serialized size of an agent's configuration bag.
pub const MAX_CONFIGURATION_BYTES: usize = 100 * 1024;

/// Keys that must never appear in a configuration bag, mirroring the
/// language-prototype-pollution denylist the original spec calls out.
pub const RESERVED_CONFIG_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    /// Rolling average execution duration in milliseconds.
    pub avg_duration_ms: f64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self { total_executions: 0, successful_executions: 0, avg_duration_ms: 0.0 }
    }
}

impl AgentMetrics {
    /// Folds one more completed execution's duration into the rolling
    /// average using the standard incremental-mean update so the engine
    /// never needs to keep the full duration history around.
    pub fn record(&mut self, succeeded: bool, duration_ms: u64) {
        self.total_executions += 1;
        if succeeded {
            self.successful_executions += 1;
        }
        let n = self.total_executions as f64;
        self.avg_duration_ms += (duration_ms as f64 - self.avg_duration_ms) / n;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub owner: UserId,
    pub name: String,
    pub framework: String,
    pub configuration: Value,
    pub tags: Vec<String>,
    pub active: bool,
    pub metrics: AgentMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validates the size and key-denylist invariants of a configuration bag.
/// Framework-specific shape validation is a separate step performed by the
/// plugin's own `validate()` (see `orchestra-frameworks`).
pub fn validate_configuration(config: &Value) -> Result<(), OrchestraError> {
    let serialized = serde_json::to_vec(config)
        .map_err(|e| OrchestraError::Internal(format!("configuration not serializable: {e}")))?;
    if serialized.len() > MAX_CONFIGURATION_BYTES {
        return Err(OrchestraError::Validation(format!(
            "configuration exceeds {MAX_CONFIGURATION_BYTES} bytes ({} given)",
            serialized.len()
        )));
    }
    check_denylisted_keys(config)
}

fn check_denylisted_keys(value: &Value) -> Result<(), OrchestraError> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if RESERVED_CONFIG_KEYS.contains(&key.as_str()) {
                    return Err(OrchestraError::Validation(format!(
                        "configuration key `{key}` is reserved"
                    )));
                }
                check_denylisted_keys(nested)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_denylisted_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_reserved_keys_anywhere_in_the_bag() {
        let config = json!({"nested": {"__proto__": {}}});
        let err = validate_configuration(&config).unwrap_err();
        assert_eq!(err.tag(), "validation");
    }

    #[test]
    fn rejects_oversized_configuration() {
        let big = "x".repeat(MAX_CONFIGURATION_BYTES + 1);
        let config = json!({ "blob": big });
        assert!(validate_configuration(&config).is_err());
    }

    #[test]
    fn accepts_ordinary_configuration() {
        let config = json!({ "model": "llama-3.3", "temperature": 0.7 });
        assert!(validate_configuration(&config).is_ok());
    }

    #[test]
    fn metrics_rolling_average_tracks_mean() {
        let mut metrics = AgentMetrics::default();
        metrics.record(true, 100);
        metrics.record(true, 300);
        assert_eq!(metrics.total_executions, 2);
        assert_eq!(metrics.successful_executions, 2);
        assert!((metrics.avg_duration_ms - 200.0).abs() < f64::EPSILON);
    }
}
