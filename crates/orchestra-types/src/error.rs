use serde::Serialize;

/// Stable error taxonomy shared by every layer of the orchestrator.
///
/// Library code below the HTTP boundary is free to use `anyhow::Result`
/// (see the engine and dispatcher loops); this type exists at the seams
/// that cross into `orchestra-server`, where a caller needs a status code
/// and a structured reason rather than a formatted string.
#[derive(Debug, thiserror::Error)]
pub enum OrchestraError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict { reason: String, details: serde_json::Value },

    #[error("rate limited, resets at {reset_at}")]
    RateLimited { reset_at: chrono::DateTime<chrono::Utc> },

    #[error("dependency unavailable: {0}")]
    Transient(String),

    #[error("framework plugin error: {0}")]
    Plugin(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl OrchestraError {
    pub fn conflict(reason: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Conflict { reason: reason.into(), details }
    }

    /// Stable machine-readable tag used by the HTTP layer to pick a status
    /// code and by tests that assert on failure kind without string matching.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict { .. } => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Plugin(_) => "plugin_error",
            Self::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<serde_json::Value>,
}

impl From<&OrchestraError> for ErrorBody {
    fn from(err: &OrchestraError) -> Self {
        let details = match err {
            OrchestraError::Conflict { details, .. } => vec![details.clone()],
            _ => Vec::new(),
        };
        ErrorBody { error: err.to_string(), details }
    }
}
