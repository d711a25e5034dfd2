use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use orchestra_cache::Cache;
use orchestra_core::SubmitOptions;
use orchestra_types::execution::{Execution, Priority, Trigger};
use orchestra_types::execution_log::{ExecutionLog, LogLevel};
use orchestra_types::ids::ExecutionId;
use orchestra_types::user::{CAP_EXECUTIONS_CANCEL, CAP_EXECUTIONS_READ, CAP_EXECUTIONS_SUBMIT};
use orchestra_types::{Event, OrchestraError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub agent_id: String,
    pub input: Value,
    pub configuration: Option<Value>,
    pub environment: Option<String>,
    pub trigger: Option<Trigger>,
    pub priority: Option<Priority>,
    pub timeout_secs: Option<u64>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub execution_id: String,
    pub status: &'static str,
}

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> Result<(axum::http::StatusCode, Json<SubmitResponse>), ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_EXECUTIONS_SUBMIT)?;

    let agent_id = body.agent_id.parse().map_err(|_| OrchestraError::Validation("agentId is not a valid id".to_string()))?;
    let options = SubmitOptions {
        priority: body.priority.unwrap_or_default(),
        trigger: body.trigger.unwrap_or_default(),
        environment: body.environment.unwrap_or_else(|| "production".to_string()),
        configuration_overrides: body.configuration,
        idempotency_key: body.idempotency_key,
        timeout: body.timeout_secs.map(Duration::from_secs),
    };

    let execution = state.engine.submit(agent_id, identity.user.id, body.input, options).await?;
    Ok((axum::http::StatusCode::CREATED, Json(SubmitResponse { execution_id: execution.id.to_string(), status: "queued" })))
}

#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: Execution,
    pub logs: Vec<ExecutionLog>,
}

pub async fn detail(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<ExecutionId>) -> Result<Json<ExecutionDetail>, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_EXECUTIONS_READ)?;

    let (execution, logs) = state.engine.status(id, identity.user.id).await?;
    Ok(Json(ExecutionDetail { execution, logs }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_logs_limit")]
    pub limit: i64,
}

fn default_logs_limit() -> i64 {
    100
}

pub async fn logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ExecutionId>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<ExecutionLog>>, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_EXECUTIONS_READ)?;

    let execution = owned_execution(&state, id, identity.user.id).await?;
    let logs = state
        .store
        .execution_logs()
        .await
        .map_err(store_unavailable)?
        .repo()
        .list(execution.id, query.level, query.offset, query.limit.clamp(1, 1000))
        .await
        .map_err(store_unavailable)?;
    Ok(Json(logs))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<ExecutionId>) -> Result<Json<CancelResponse>, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_EXECUTIONS_CANCEL)?;

    let cancelled = state.engine.cancel(id, identity.user.id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ExecutionId>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_EXECUTIONS_READ)?;

    let (execution, logs) = state.engine.status(id, identity.user.id).await?;
    let snapshot = serde_json::json!({ "execution": execution, "logs": logs });
    let snapshot_event = tokio_stream::once(Ok(SseEvent::default().event("snapshot").data(snapshot.to_string())));

    let live = merged_event_stream(state.engine.subscribe(id), state.cache.clone(), id).map(|event| {
        let name = event.type_name();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(name).data(data))
    });

    Ok(Sse::new(snapshot_event.chain(live)).keep_alive(KeepAlive::new().interval(Duration::from_secs(10))))
}

/// Merges the in-process bus subscription with the execution's Redis
/// pub/sub channel, so a client attached to a different replica than the
/// one running the execution still receives every event. An execution
/// running on this replica publishes to both, so events are deduped by
/// content before being yielded; the stream ends after the first terminal
/// event from either source.
fn merged_event_stream(local: impl Stream<Item = Event> + Send + 'static, cache: Cache, execution_id: ExecutionId) -> impl Stream<Item = Event> {
    let channel = orchestra_cache::pubsub::execution_channel(&execution_id);
    async_stream::stream! {
        let remote = cache.subscribe(channel).await.ok();
        let mut seen = HashSet::new();
        tokio::pin!(local);

        let Some(remote) = remote else {
            while let Some(event) = local.next().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
            return;
        };
        tokio::pin!(remote);

        let mut local_open = true;
        let mut remote_open = true;
        while local_open || remote_open {
            let next = tokio::select! {
                event = local.next(), if local_open => match event {
                    Some(event) => Some(event),
                    None => { local_open = false; continue; }
                },
                payload = remote.next(), if remote_open => match payload {
                    Some(payload) => match serde_json::from_str::<Event>(&payload) {
                        Ok(event) => Some(event),
                        Err(_) => continue,
                    },
                    None => { remote_open = false; continue; }
                },
            };
            let Some(event) = next else { continue };
            if seen.insert(serde_json::to_string(&event).unwrap_or_default()) {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        }
    }
}

async fn owned_execution(state: &AppState, id: ExecutionId, user_id: orchestra_types::ids::UserId) -> Result<Execution, ApiError> {
    let execution = state
        .store
        .executions()
        .await
        .map_err(store_unavailable)?
        .repo()
        .get_by_id(id)
        .await
        .map_err(store_unavailable)?
        .ok_or_else(|| OrchestraError::NotFound(format!("execution {id} not found")))?;
    if execution.submitted_by != user_id {
        return Err(OrchestraError::NotFound(format!("execution {id} not found")).into());
    }
    Ok(execution)
}

fn store_unavailable(err: orchestra_store::StoreError) -> ApiError {
    ApiError(OrchestraError::Transient(err.to_string()))
}
