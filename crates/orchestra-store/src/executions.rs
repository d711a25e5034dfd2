use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use tracing::instrument;

use orchestra_types::execution::{Execution, ExecutionStatus, Priority, Trigger};
use orchestra_types::ids::{abbrev, AgentId, ExecutionId, UserId};

use crate::error::Result;
use crate::rows::{priority_str, status_str, trigger_str, ExecutionRow};

pub struct Executions<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Executions<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Inserts a new `pending` execution. Single-flight-per-agent is
    /// enforced by `idx_executions_agent_nonterminal`, a partial unique
    /// index on `agent_id` for rows in `('pending', 'running')` — a
    /// concurrent second submission for the same agent fails this insert
    /// with a unique-violation rather than racing a read-then-write check.
    #[instrument(skip(self, input, metadata), fields(agent_id = %abbrev(&agent_id.0)), err)]
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &mut self,
        agent_id: AgentId,
        submitted_by: UserId,
        input: Value,
        priority: Priority,
        trigger: Trigger,
        environment: &str,
        idempotency_key: Option<&str>,
        metadata: Value,
    ) -> Result<Execution> {
        let id = ExecutionId::new();
        let row: ExecutionRow = sqlx::query_as(
            r#"
            INSERT INTO executions (id, agent_id, submitted_by, status, priority, trigger, input, environment, idempotency_key, metadata)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(agent_id.0)
        .bind(submitted_by.0)
        .bind(priority_str(priority))
        .bind(trigger_str(trigger))
        .bind(input)
        .bind(environment)
        .bind(idempotency_key)
        .bind(metadata)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.try_into()?)
    }

    #[instrument(skip(self), fields(execution_id = %abbrev(&id.0)), err)]
    pub async fn get_by_id(&mut self, id: ExecutionId) -> Result<Option<Execution>> {
        let row: Option<ExecutionRow> = sqlx::query_as("SELECT * FROM executions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// Per-user non-terminal count, compared against `MAX_CONCURRENT_PER_USER`
    /// by the submission gate before a new execution is admitted.
    #[instrument(skip(self), fields(submitted_by = %abbrev(&submitted_by.0)), err)]
    pub async fn count_nonterminal_for_user(&mut self, submitted_by: UserId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM executions WHERE submitted_by = $1 AND status IN ('pending', 'running')",
        )
        .bind(submitted_by.0)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count)
    }

    /// Whether the agent already has a non-terminal execution (pre-check
    /// surfaced at submission time; the authoritative guard is still the
    /// partial unique index, this is only for a friendlier error body).
    #[instrument(skip(self), fields(agent_id = %abbrev(&agent_id.0)), err)]
    pub async fn active_for_agent(&mut self, agent_id: AgentId) -> Result<Option<Execution>> {
        let row: Option<ExecutionRow> =
            sqlx::query_as("SELECT * FROM executions WHERE agent_id = $1 AND status IN ('pending', 'running')")
                .bind(agent_id.0)
                .fetch_optional(&mut *self.conn)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// Claims up to `limit` pending executions for this worker, locking the
    /// rows with `FOR UPDATE SKIP LOCKED` so multiple replicas never double
    /// dispatch, and transitions them to `running` in the same statement.
    #[instrument(skip(self), fields(worker = %worker), err)]
    pub async fn claim_pending(&mut self, worker: &str, limit: i64) -> Result<Vec<Execution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            WITH claimed AS (
                SELECT id FROM executions
                WHERE status = 'pending'
                ORDER BY
                    CASE priority WHEN 'high' THEN 1 WHEN 'normal' THEN 2 WHEN 'low' THEN 3 ELSE 4 END ASC,
                    created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE executions e
            SET status = 'running', started_at = now(), locked_by = $1, locked_until = now() + interval '5 minutes'
            FROM claimed
            WHERE e.id = claimed.id
            RETURNING e.*
            "#,
        )
        .bind(worker)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Conditional update guarding every lifecycle transition: only rows
    /// still in a non-terminal state are moved, so a terminal execution can
    /// never be overwritten by a stale worker or a duplicate cancel.
    #[instrument(skip(self, output, error), fields(execution_id = %abbrev(&id.0)), err)]
    #[allow(clippy::too_many_arguments)]
    pub async fn finish(
        &mut self,
        id: ExecutionId,
        status: ExecutionStatus,
        output: Option<Value>,
        error: Option<&str>,
        tokens_used: Option<i64>,
        cost_usd: Option<f64>,
        duration_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, output = $3, error = $4, tokens_used = $5, cost_usd = $6,
                duration_ms = $7, completed_at = now(), locked_by = NULL, locked_until = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id.0)
        .bind(status_str(status))
        .bind(output)
        .bind(error)
        .bind(tokens_used)
        .bind(cost_usd)
        .bind(duration_ms)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancellation is idempotent: only `pending`/`running` rows transition,
    /// so calling this twice on an already-terminal execution is a no-op
    /// that reports `false`.
    #[instrument(skip(self), fields(execution_id = %abbrev(&id.0)), err)]
    pub async fn cancel(&mut self, id: ExecutionId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'cancelled', completed_at = now(), locked_by = NULL, locked_until = NULL,
                duration_ms = EXTRACT(EPOCH FROM (now() - COALESCE(started_at, created_at))) * 1000
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.0)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Boot-time sweep: non-terminal executions whose lease expired (or
    /// that predate the threshold) are orphaned by a crashed worker and are
    /// marked `failed` so single-flight doesn't wedge an agent forever.
    #[instrument(skip(self), err)]
    pub async fn reap_orphans(&mut self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'failed', error = 'orphaned', completed_at = now(), locked_by = NULL, locked_until = NULL
            WHERE status IN ('pending', 'running') AND created_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Daily cleanup: delete terminal executions older than the retention
    /// window. Logs cascade via the foreign key's `ON DELETE CASCADE`.
    #[instrument(skip(self), err)]
    pub async fn delete_completed_before(&mut self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM executions WHERE status IN ('completed', 'failed', 'cancelled', 'timeout') AND completed_at < $1",
        )
        .bind(before)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count of executions still waiting for a worker, the queue backlog
    /// figure reported by the health endpoint.
    #[instrument(skip(self), err)]
    pub async fn count_pending(&mut self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM executions WHERE status = 'pending'")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Completed/failed-or-timed-out counts since `since`, the numerator and
    /// denominator behind the health endpoint's rolling error rate.
    #[instrument(skip(self), err)]
    pub async fn count_recent_outcomes(&mut self, since: DateTime<Utc>) -> Result<(i64, i64)> {
        let (completed,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM executions WHERE status = 'completed' AND completed_at >= $1",
        )
        .bind(since)
        .fetch_one(&mut *self.conn)
        .await?;
        let (failed,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM executions WHERE status IN ('failed', 'timeout') AND completed_at >= $1",
        )
        .bind(since)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok((completed, failed))
    }

    #[instrument(skip(self), fields(owner = %abbrev(&owner.0)), err)]
    pub async fn list_by_owner(&mut self, owner: UserId, limit: i64) -> Result<Vec<Execution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM executions WHERE submitted_by = $1 ORDER BY started_at DESC NULLS LAST, created_at DESC LIMIT $2",
        )
        .bind(owner.0)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
