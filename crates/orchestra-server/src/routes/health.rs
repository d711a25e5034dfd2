use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum DependencyStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
struct Dependency {
    name: &'static str,
    status: DependencyStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: DependencyStatus,
    uptime_secs: i64,
    dependencies: Vec<Dependency>,
    queue_backlog: i64,
    error_rate: f64,
}

/// Liveness summary: per-dependency status, process uptime, queue backlog,
/// and a trailing-hour error rate. Never requires authentication — callers
/// (load balancers, k8s probes) hit this before a session exists.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_status = match state.store.ping().await {
        Ok(()) => DependencyStatus::Pass,
        Err(err) => {
            tracing::warn!(error = %err, "health check: database unreachable");
            DependencyStatus::Fail
        }
    };

    let mut cache = state.cache.clone();
    let cache_status = match cache.ping().await {
        Ok(()) => DependencyStatus::Pass,
        Err(err) => {
            tracing::warn!(error = %err, "health check: cache unreachable");
            DependencyStatus::Warn
        }
    };

    let (queue_backlog, error_rate) = match state.store.executions().await {
        Ok(mut handle) => {
            let repo = handle.repo();
            let backlog = repo.count_pending().await.unwrap_or(0);
            let since = Utc::now() - chrono::Duration::hours(1);
            let (completed, failed) = repo.count_recent_outcomes(since).await.unwrap_or((0, 0));
            let total = completed + failed;
            let rate = if total == 0 { 0.0 } else { failed as f64 / total as f64 };
            (backlog, rate)
        }
        Err(_) => (0, 0.0),
    };

    let dependencies = vec![Dependency { name: "database", status: db_status }, Dependency { name: "cache", status: cache_status }];
    let overall = if dependencies.iter().any(|d| d.status == DependencyStatus::Fail) {
        DependencyStatus::Fail
    } else if dependencies.iter().any(|d| d.status == DependencyStatus::Warn) {
        DependencyStatus::Warn
    } else {
        DependencyStatus::Pass
    };

    Json(HealthResponse {
        status: overall,
        uptime_secs: (Utc::now() - state.started_at).num_seconds().max(0),
        dependencies,
        queue_backlog,
        error_rate,
    })
}
