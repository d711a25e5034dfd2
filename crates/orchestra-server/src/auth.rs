//! Identity extraction: reads the `Authorization: Bearer` header and
//! dispatches to the session or API-key verification path based on the
//! presented token's prefix, then applies the gate's general rate limit.

use axum::http::HeaderMap;
use orchestra_core::{Identity, SubmissionGate};
use orchestra_types::api_key::API_KEY_PREFIX;
use orchestra_types::OrchestraError;

/// Authenticates the request and charges it against the general API rate
/// limit, keyed by the resolved user so a caller can't dodge the limit by
/// rotating API keys.
pub async fn authenticate(gate: &mut SubmissionGate, headers: &HeaderMap) -> Result<Identity, OrchestraError> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestraError::Unauthorized("missing bearer token".to_string()))?;

    let identity = if bearer.starts_with(API_KEY_PREFIX) {
        gate.authenticate_api_key(bearer).await?
    } else {
        gate.authenticate_session(bearer).await?
    };

    gate.check_rate_limit(&format!("user:{}", identity.user.id)).await?;
    Ok(identity)
}
