use serde_json::Value;
use sqlx::PgConnection;
use tracing::instrument;

use orchestra_types::execution_log::{ExecutionLog, LogLevel};
use orchestra_types::ids::{abbrev, ExecutionId, ExecutionLogId};

use crate::error::Result;
use crate::rows::{level_str, ExecutionLogRow};

pub struct ExecutionLogs<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> ExecutionLogs<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Appends a log line at the next sequence number for the execution.
    /// `idx_execution_logs_sequence` is a unique index on
    /// `(execution_id, sequence)`, so a caller that races on sequence
    /// allocation (e.g. two log calls issued concurrently from the same
    /// plugin) fails loudly instead of silently reordering the stream.
    #[instrument(skip(self, message, metadata), fields(execution_id = %abbrev(&execution_id.0)), err)]
    pub async fn append(
        &mut self,
        execution_id: ExecutionId,
        sequence: u64,
        level: LogLevel,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<ExecutionLog> {
        let id = ExecutionLogId::new();
        let row: ExecutionLogRow = sqlx::query_as(
            r#"
            INSERT INTO execution_logs (id, execution_id, sequence, level, message, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(execution_id.0)
        .bind(sequence as i64)
        .bind(level_str(level))
        .bind(message)
        .bind(metadata)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.try_into()?)
    }

    /// Paginated read in strict append order, optionally filtered to a
    /// minimum severity.
    #[instrument(skip(self), fields(execution_id = %abbrev(&execution_id.0)), err)]
    pub async fn list(
        &mut self,
        execution_id: ExecutionId,
        min_level: Option<LogLevel>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>> {
        let rows: Vec<ExecutionLogRow> = match min_level {
            Some(level) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM execution_logs
                    WHERE execution_id = $1
                        AND (CASE level
                            WHEN 'debug' THEN 0 WHEN 'info' THEN 1 WHEN 'warn' THEN 2
                            WHEN 'error' THEN 3 WHEN 'fatal' THEN 4 ELSE -1 END) >= $2
                    ORDER BY sequence ASC
                    OFFSET $3 LIMIT $4
                    "#,
                )
                .bind(execution_id.0)
                .bind(level.rank())
                .bind(offset)
                .bind(limit)
                .fetch_all(&mut *self.conn)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM execution_logs
                    WHERE execution_id = $1
                    ORDER BY sequence ASC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(execution_id.0)
                .bind(offset)
                .bind(limit)
                .fetch_all(&mut *self.conn)
                .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Last `n` log lines, used to build the initial snapshot pushed to a
    /// newly-authorized realtime subscriber.
    #[instrument(skip(self), fields(execution_id = %abbrev(&execution_id.0)), err)]
    pub async fn tail(&mut self, execution_id: ExecutionId, n: i64) -> Result<Vec<ExecutionLog>> {
        let rows: Vec<ExecutionLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM (
                SELECT * FROM execution_logs WHERE execution_id = $1 ORDER BY sequence DESC LIMIT $2
            ) recent ORDER BY sequence ASC
            "#,
        )
        .bind(execution_id.0)
        .bind(n)
        .fetch_all(&mut *self.conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn next_sequence(&mut self, execution_id: ExecutionId) -> Result<u64> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT max(sequence) FROM execution_logs WHERE execution_id = $1")
            .bind(execution_id.0)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(max.map(|v| v + 1).unwrap_or(0) as u64)
    }
}
