//! Maps the shared `OrchestraError` taxonomy onto HTTP responses. Every
//! route returns `Result<T, ApiError>`; this is the only place status codes
//! are chosen.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestra_types::error::ErrorBody;
use orchestra_types::OrchestraError;
use uuid::Uuid;

pub struct ApiError(pub OrchestraError);

impl From<OrchestraError> for ApiError {
    fn from(err: OrchestraError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            OrchestraError::Internal(detail) => {
                let error_id = Uuid::new_v4();
                tracing::error!(%error_id, detail, "internal invariant violated");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal error", "errorId": error_id.to_string() })),
                )
                    .into_response()
            }
            OrchestraError::RateLimited { reset_at } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({ "error": "rate limit exceeded", "resetAt": reset_at.to_rfc3339() })),
            )
                .into_response(),
            other => {
                let status = status_for(&other);
                (status, Json(ErrorBody::from(&other))).into_response()
            }
        }
    }
}

fn status_for(err: &OrchestraError) -> StatusCode {
    match err {
        OrchestraError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestraError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestraError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        OrchestraError::Conflict { .. } => StatusCode::CONFLICT,
        OrchestraError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        OrchestraError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestraError::Plugin(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestraError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
