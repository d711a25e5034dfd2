//! The Execution Engine: submission, the worker pool that
//! dispatches pending executions by claiming them from the Postgres-backed
//! queue, lifecycle persistence, cancellation, and the per-execution
//! subscription surface the realtime layer streams from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use orchestra_frameworks::{ExecutionOutcome, FrameworkRegistry, PluginContext, PluginError};
use orchestra_store::Store;
use orchestra_types::execution::{Execution, Priority, Trigger};
use orchestra_types::execution_log::LogLevel;
use sqlx::error::DatabaseError;
use orchestra_types::ids::{AgentId, ExecutionId, UserId};
use orchestra_types::{Event, ExecutionStatus, OrchestraError};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::bus::EventBus;
use crate::observability;

/// Per-agent single-flight and per-user concurrency caps.
pub const MAX_CONCURRENT_PER_USER: i64 = 10;
pub const MAX_CONCURRENT_EXECUTIONS: usize = 50;
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);
pub const MIN_EXECUTION_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SubmitOptions {
    pub priority: Priority,
    pub trigger: Trigger,
    pub environment: String,
    pub configuration_overrides: Option<Value>,
    pub idempotency_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            trigger: Trigger::Manual,
            environment: "production".to_string(),
            configuration_overrides: None,
            idempotency_key: None,
            timeout: None,
        }
    }
}

fn clamp_timeout(requested: Option<Duration>, max: Duration) -> Duration {
    requested.unwrap_or(DEFAULT_EXECUTION_TIMEOUT).clamp(MIN_EXECUTION_TIMEOUT, max)
}

/// Tracked per in-flight execution so `cancel` can signal the worker
/// actually running it and the deadline task can enforce the timeout.
struct InFlight {
    cancel_token: CancellationToken,
}

#[derive(Clone)]
pub struct ExecutionEngine {
    store: Store,
    frameworks: Arc<FrameworkRegistry>,
    bus: EventBus,
    in_flight: Arc<RwLock<HashMap<ExecutionId, InFlight>>>,
    worker_id: Arc<str>,
    max_execution_time: Duration,
    max_concurrent_executions: usize,
    dispatch_interval: Duration,
}

impl ExecutionEngine {
    pub fn new(
        store: Store,
        frameworks: Arc<FrameworkRegistry>,
        bus: EventBus,
        worker_id: String,
        max_execution_time: Duration,
        max_concurrent_executions: usize,
    ) -> Self {
        Self {
            store,
            frameworks,
            bus,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            worker_id: Arc::from(worker_id.into_boxed_str()),
            max_execution_time,
            max_concurrent_executions,
            dispatch_interval: Duration::from_millis(200),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Marks non-terminal executions that predate `2 * MAX_EXECUTION_TIME`
    /// as orphaned, run once at boot before any submission is accepted
    /// at boot before any submission is accepted.
    #[instrument(skip(self))]
    pub async fn reap_orphans(&self) -> anyhow::Result<u64> {
        let threshold = Utc::now() - chrono::Duration::from_std(self.max_execution_time * 2)?;
        let reaped = self.store.executions().await?.repo().reap_orphans(threshold).await?;
        if reaped > 0 {
            warn!(count = reaped, "reaped orphaned executions at boot");
        }
        Ok(reaped)
    }

    #[instrument(skip(self, input, options), fields(agent_id = %orchestra_types::ids::abbrev(&agent_id.0)), err)]
    pub async fn submit(
        &self,
        agent_id: AgentId,
        submitter: UserId,
        input: Value,
        options: SubmitOptions,
    ) -> Result<Execution, OrchestraError> {
        let mut agents = self.store.agents().await.map_err(store_unavailable)?;
        let agent = agents
            .repo()
            .get_by_id(agent_id)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| OrchestraError::NotFound(format!("agent {agent_id} not found")))?;

        if agent.owner != submitter {
            return Err(OrchestraError::NotFound(format!("agent {agent_id} not found")));
        }
        if !agent.active {
            return Err(OrchestraError::conflict("agent is inactive", serde_json::json!({ "agentId": agent_id.to_string() })));
        }
        if self.frameworks.get(&agent.framework).is_none() {
            return Err(OrchestraError::Internal(format!("unsupported framework `{}`", agent.framework)));
        }

        let mut executions = self.store.executions().await.map_err(store_unavailable)?;
        let repo = executions.repo();

        if let Some(active) = repo.active_for_agent(agent_id).await.map_err(store_unavailable)? {
            return Err(OrchestraError::conflict(
                "agent already has a non-terminal execution",
                serde_json::json!({ "executionId": active.id.to_string() }),
            ));
        }

        let nonterminal = repo.count_nonterminal_for_user(submitter).await.map_err(store_unavailable)?;
        if nonterminal >= MAX_CONCURRENT_PER_USER {
            return Err(OrchestraError::conflict(
                "concurrent execution limit reached",
                serde_json::json!({ "limit": MAX_CONCURRENT_PER_USER }),
            ));
        }

        let effective_configuration = match options.configuration_overrides {
            Some(overrides) => merge_configuration(&agent.configuration, &overrides),
            None => agent.configuration.clone(),
        };
        orchestra_types::agent::validate_configuration(&effective_configuration)?;
        if let Some(plugin) = self.frameworks.get(&agent.framework) {
            plugin.validate(&effective_configuration).map_err(|errors| OrchestraError::Validation(errors.join("; ")))?;
        }

        let timeout = clamp_timeout(options.timeout, self.max_execution_time);
        let metadata = serde_json::json!({ "timeoutSecs": timeout.as_secs() });

        let execution = repo
            .submit(
                agent_id,
                submitter,
                input,
                options.priority,
                options.trigger,
                &options.environment,
                options.idempotency_key.as_deref(),
                metadata,
            )
            .await
            .map_err(|e| match e {
                orchestra_store::StoreError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    OrchestraError::conflict("agent already has a non-terminal execution", serde_json::json!({}))
                }
                other => store_unavailable(other),
            })?;

        info!(execution_id = %orchestra_types::ids::abbrev(&execution.id.0), "execution submitted");
        Ok(execution)
    }

    #[instrument(skip(self), err)]
    pub async fn cancel(&self, execution_id: ExecutionId, submitter: UserId) -> Result<bool, OrchestraError> {
        let mut handle = self.store.executions().await.map_err(store_unavailable)?;
        let repo = handle.repo();
        let execution = repo
            .get_by_id(execution_id)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| OrchestraError::NotFound(format!("execution {execution_id} not found")))?;
        if execution.submitted_by != submitter {
            return Err(OrchestraError::NotFound(format!("execution {execution_id} not found")));
        }

        let cancelled = repo.cancel(execution_id).await.map_err(store_unavailable)?;
        if cancelled {
            if let Some(in_flight) = self.in_flight.read().await.get(&execution_id) {
                in_flight.cancel_token.cancel();
            }
            self.bus.publish(Event::Cancelled { execution_id });
        }
        Ok(cancelled)
    }

    #[instrument(skip(self), err)]
    pub async fn status(&self, execution_id: ExecutionId, submitter: UserId) -> Result<(Execution, Vec<orchestra_types::ExecutionLog>), OrchestraError> {
        let execution = self
            .store
            .executions()
            .await
            .map_err(store_unavailable)?
            .repo()
            .get_by_id(execution_id)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| OrchestraError::NotFound(format!("execution {execution_id} not found")))?;
        if execution.submitted_by != submitter {
            return Err(OrchestraError::NotFound(format!("execution {execution_id} not found")));
        }
        let logs = self.store.execution_logs().await.map_err(store_unavailable)?.repo().tail(execution_id, 50).await.map_err(store_unavailable)?;
        Ok((execution, logs))
    }

    /// Subscribes to the bus and filters to one execution; callers get
    /// every event published from this point on, nothing from before.
    pub fn subscribe(&self, execution_id: ExecutionId) -> impl futures::Stream<Item = Event> {
        let mut rx = self.bus.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) if event.execution_id() == execution_id => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// One worker-pool loop: repeatedly claims up to `max_concurrent -
    /// in_flight` pending executions and spawns a task per claim. Intended
    /// to be run as a long-lived `tokio::spawn`ed task for the lifetime of
    /// the process; `shutdown` stops the loop from claiming further work.
    pub async fn run_dispatch_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.dispatch_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("dispatch loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.dispatch_once().await {
                        warn!(error = %err, "dispatch tick failed");
                    }
                }
            }
        }
    }

    async fn dispatch_once(&self) -> anyhow::Result<()> {
        let capacity = self.max_concurrent_executions.saturating_sub(self.in_flight.read().await.len());
        if capacity == 0 {
            return Ok(());
        }
        let claimed = self.store.executions().await?.repo().claim_pending(&self.worker_id, capacity as i64).await?;
        for execution in claimed {
            let engine = self.clone_for_worker();
            tokio::spawn(async move {
                engine.run_one(execution).await;
            });
        }
        Ok(())
    }

    fn clone_for_worker(&self) -> Self {
        self.clone()
    }

    async fn run_one(&self, execution: Execution) {
        let execution_id = execution.id;
        let agent_id = execution.agent_id;
        let cancel_token = CancellationToken::new();
        self.in_flight.write().await.insert(execution_id, InFlight { cancel_token: cancel_token.clone() });

        self.bus.publish(Event::Started { execution_id, at: Utc::now() });
        self.bus.publish(Event::State { execution_id, status: ExecutionStatus::Running });
        observability::execution_event(tracing::Level::INFO, execution_id, agent_id, "execution started");

        let outcome = self.drive_plugin(&execution, cancel_token.clone()).await;

        self.in_flight.write().await.remove(&execution_id);
        self.persist_outcome(execution, outcome).await;
    }

    async fn drive_plugin(&self, execution: &Execution, cancel_token: CancellationToken) -> Result<ExecutionOutcome, PluginError> {
        let mut agents = self.store.agents().await.map_err(|e| PluginError::new(e.to_string()))?;
        let agent = agents
            .repo()
            .get_by_id(execution.agent_id)
            .await
            .map_err(|e| PluginError::new(e.to_string()))?
            .ok_or_else(|| PluginError::new("agent disappeared mid-dispatch"))?;

        if !agent.active {
            return Err(PluginError::new("agent was deactivated after dispatch"));
        }

        let plugin = self.frameworks.get(&agent.framework).ok_or_else(|| PluginError::new(format!("unsupported framework `{}`", agent.framework)))?;

        let store = self.store.clone();
        let bus = self.bus.clone();
        let execution_id = execution.id;

        // Logs are enqueued in call order by a plain synchronous send (no
        // `.await`, so the closure can't reorder relative to the plugin's
        // own call sequence), then persisted and published in that same
        // order by a single drain task. `drive_plugin` awaits the drain
        // task after the plugin call resolves, so every log a plugin wrote
        // has reached the bus before `persist_outcome` ever emits the
        // terminal event.
        let (log_tx, log_rx) = mpsc::unbounded_channel::<(u64, LogLevel, String, Option<Value>)>();
        let sequence_counter = StdMutex::new(0u64);
        let log_sink: orchestra_frameworks::LogSink = Arc::new(move |level, message, metadata| {
            let sequence = {
                let mut guard = sequence_counter.lock().expect("sequence counter mutex poisoned");
                let seq = *guard;
                *guard += 1;
                seq
            };
            let _ = log_tx.send((sequence, level, message, metadata));
        });
        let log_task = tokio::spawn(drain_logs(store.clone(), bus.clone(), execution_id, log_rx));

        let progress_bus = bus.clone();
        let progress_sink: orchestra_frameworks::ProgressSink = Arc::new(move |percent| {
            progress_bus.publish(Event::Progress { execution_id, message: "progress".to_string(), percent: Some(percent) });
        });

        let context = PluginContext {
            agent_id: execution.agent_id,
            execution_id: execution.id,
            submitter_id: execution.submitted_by,
            input: execution.input.clone(),
            configuration: agent.configuration.clone(),
            environment: execution.environment.clone(),
            log: log_sink,
            progress: progress_sink,
            cancelled: cancel_token.clone(),
        };

        let requested_timeout_secs = execution.metadata.get("timeoutSecs").and_then(Value::as_u64);
        let timeout = clamp_timeout(requested_timeout_secs.map(Duration::from_secs), self.max_execution_time);

        let outcome = tokio::select! {
            result = plugin.execute(context) => result,
            _ = tokio::time::sleep(timeout) => {
                cancel_token.cancel();
                Err(PluginError::new(format!("execution exceeded {}s deadline", timeout.as_secs())))
            }
            _ = cancel_token.cancelled() => {
                Err(PluginError::new("cancelled"))
            }
        };

        // `context` (and with it the only sender half of `log_tx`) was
        // dropped when the select above resolved, whichever branch won —
        // either `execute` consumed and finished with it, or losing the
        // race dropped its still-pending future. The drain task's channel
        // is therefore closed, and awaiting it here blocks only until the
        // already-queued logs finish publishing.
        let _ = log_task.await;

        outcome
    }

    async fn persist_outcome(&self, execution: Execution, outcome: Result<ExecutionOutcome, PluginError>) {
        let execution_id = execution.id;
        let started_at = execution.started_at.unwrap_or(execution.created_at);
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0);

        let (status, succeeded, output, error, tokens_used, cost_usd) = match outcome {
            Ok(outcome) => (ExecutionStatus::Completed, true, Some(outcome.output), None, outcome.tokens_used, outcome.cost_usd),
            Err(err) if err.message.contains("deadline") => (ExecutionStatus::Timeout, false, None, Some(err.message), None, None),
            Err(err) if err.message == "cancelled" => {
                // Already transitioned to `cancelled` by `cancel()`'s conditional
                // update; nothing further to persist here.
                let _ = err;
                return;
            }
            Err(err) => (ExecutionStatus::Failed, false, None, Some(err.message), None, None),
        };

        let mut handle = match self.store.executions().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "failed to acquire store connection to persist execution outcome");
                return;
            }
        };
        let finished = handle
            .repo()
            .finish(
                execution_id,
                status,
                output.clone(),
                error.as_deref(),
                tokens_used.map(|v| v as i64),
                cost_usd,
                duration_ms,
            )
            .await
            .unwrap_or(false);

        if !finished {
            // Another path (e.g. a concurrent cancel) already moved this
            // execution to a terminal state; don't double-emit.
            return;
        }

        if let Ok(mut agents) = self.store.agents().await {
            let _ = agents.repo().record_execution_outcome(execution.agent_id, succeeded, duration_ms).await;
        }

        self.bus.publish(Event::State { execution_id, status });
        match status {
            ExecutionStatus::Completed => {
                self.bus.publish(Event::Completed { execution_id, output: output.unwrap_or(Value::Null), cost: cost_usd.map(|c| serde_json::json!(c)) });
            }
            ExecutionStatus::Failed | ExecutionStatus::Timeout => {
                self.bus.publish(Event::Failed { execution_id, error: error.unwrap_or_default() });
            }
            _ => {}
        }
        observability::execution_event(tracing::Level::INFO, execution_id, execution.agent_id, &format!("execution finished: {status:?}"));
    }
}

/// Persists and publishes queued log entries strictly in the order they
/// were enqueued, one at a time, so append order, sequence assignment, and
/// bus arrival order all agree with plugin call order.
async fn drain_logs(store: Store, bus: EventBus, execution_id: ExecutionId, mut log_rx: mpsc::UnboundedReceiver<(u64, LogLevel, String, Option<Value>)>) {
    while let Some((sequence, level, message, metadata)) = log_rx.recv().await {
        if let Ok(mut handle) = store.execution_logs().await {
            let _ = handle.repo().append(execution_id, sequence, level, &message, metadata.clone()).await;
        }
        bus.publish(Event::Log { execution_id, level, message, sequence });
    }
}

fn merge_configuration(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, overrides) => overrides.clone(),
    }
}

fn store_unavailable(err: orchestra_store::StoreError) -> OrchestraError {
    OrchestraError::Transient(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overlays_overrides_onto_base() {
        let base = json!({ "model": "a", "temperature": 0.5 });
        let overrides = json!({ "temperature": 0.9 });
        let merged = merge_configuration(&base, &overrides);
        assert_eq!(merged, json!({ "model": "a", "temperature": 0.9 }));
    }

    #[test]
    fn clamp_timeout_respects_bounds() {
        assert_eq!(clamp_timeout(Some(Duration::from_secs(0)), Duration::from_secs(120)), MIN_EXECUTION_TIMEOUT);
        assert_eq!(clamp_timeout(Some(Duration::from_secs(999)), Duration::from_secs(120)), Duration::from_secs(120));
        assert_eq!(clamp_timeout(None, Duration::from_secs(120)), DEFAULT_EXECUTION_TIMEOUT);
    }
}
