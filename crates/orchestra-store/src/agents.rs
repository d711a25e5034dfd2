use serde_json::Value;
use sqlx::PgConnection;
use tracing::instrument;

use orchestra_types::agent::Agent;
use orchestra_types::ids::{abbrev, AgentId, UserId};

use crate::error::Result;
use crate::rows::AgentRow;

pub struct Agents<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Agents<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, configuration), fields(owner = %abbrev(&owner.0)), err)]
    pub async fn create(
        &mut self,
        owner: UserId,
        name: &str,
        framework: &str,
        configuration: Value,
        tags: &[String],
    ) -> Result<Agent> {
        let id = AgentId::new();
        let row: AgentRow = sqlx::query_as(
            r#"
            INSERT INTO agents (id, owner, name, framework, configuration, tags)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(owner.0)
        .bind(name)
        .bind(framework)
        .bind(configuration)
        .bind(tags)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.into())
    }

    #[instrument(skip(self), fields(agent_id = %abbrev(&id.0)), err)]
    pub async fn get_by_id(&mut self, id: AgentId) -> Result<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(owner = %abbrev(&owner.0)), err)]
    pub async fn list_by_owner(&mut self, owner: UserId) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE owner = $1 ORDER BY created_at DESC")
            .bind(owner.0)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, configuration), fields(agent_id = %abbrev(&id.0)), err)]
    pub async fn update_configuration(&mut self, id: AgentId, configuration: Value) -> Result<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as(
            r#"
            UPDATE agents SET configuration = $2, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(configuration)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(agent_id = %abbrev(&id.0)), err)]
    pub async fn set_active(&mut self, id: AgentId, active: bool) -> Result<()> {
        sqlx::query("UPDATE agents SET active = $2, updated_at = now() WHERE id = $1")
            .bind(id.0)
            .bind(active)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Folds one more completed execution's outcome and duration into the
    /// agent's rolling metrics using the standard incremental-mean update,
    /// so the store never needs to scan full execution history to report
    /// `avg_duration_ms`.
    #[instrument(skip(self), fields(agent_id = %abbrev(&id.0)), err)]
    pub async fn record_execution_outcome(&mut self, id: AgentId, succeeded: bool, duration_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agents
            SET
                total_executions = total_executions + 1,
                successful_executions = successful_executions + CASE WHEN $2 THEN 1 ELSE 0 END,
                avg_duration_ms = avg_duration_ms + ($3 - avg_duration_ms) / (total_executions + 1),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(succeeded)
        .bind(duration_ms as f64)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(agent_id = %abbrev(&id.0)), err)]
    pub async fn delete(&mut self, id: AgentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
