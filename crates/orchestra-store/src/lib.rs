//! The relational persistent store: system of record for users, api keys,
//! agents, executions, execution logs, webhooks, and webhook deliveries.
//!
//! `Store` wraps a `sqlx::PgPool`; every operation is a short-lived
//! connection checkout followed by a repository call, mirroring the
//! `Webhooks::new(&mut conn)` shape used throughout this crate's grounding
//! reference. Migrations live under `migrations/` and run via
//! `Store::migrate` at boot.

pub mod agents;
pub mod api_keys;
pub mod error;
pub mod execution_logs;
pub mod executions;
pub mod rows;
pub mod users;
pub mod webhooks;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use agents::Agents;
pub use api_keys::ApiKeys;
pub use error::{Result, StoreError};
pub use execution_logs::ExecutionLogs;
pub use executions::Executions;
pub use users::Users;
pub use webhooks::Webhooks;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| StoreError::Database(sqlx::Error::from(e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn users(&self) -> Result<UsersHandle> {
        Ok(UsersHandle { conn: self.pool.acquire().await? })
    }

    pub async fn api_keys(&self) -> Result<ApiKeysHandle> {
        Ok(ApiKeysHandle { conn: self.pool.acquire().await? })
    }

    pub async fn agents(&self) -> Result<AgentsHandle> {
        Ok(AgentsHandle { conn: self.pool.acquire().await? })
    }

    pub async fn executions(&self) -> Result<ExecutionsHandle> {
        Ok(ExecutionsHandle { conn: self.pool.acquire().await? })
    }

    pub async fn execution_logs(&self) -> Result<ExecutionLogsHandle> {
        Ok(ExecutionLogsHandle { conn: self.pool.acquire().await? })
    }

    pub async fn webhooks(&self) -> Result<WebhooksHandle> {
        Ok(WebhooksHandle { conn: self.pool.acquire().await? })
    }

    /// `SELECT 1` round-trip; used by the health endpoint to report the
    /// database dependency's status.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Owns a checked-out connection backing the matching repository; keeps
/// call sites at `store.executions().await?.repo().submit(...)` without
/// forcing every caller to juggle a `PoolConnection` directly.
macro_rules! repo_handle {
    ($handle:ident, $repo:ident) => {
        pub struct $handle {
            conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
        }

        impl $handle {
            pub fn repo(&mut self) -> $repo<'_> {
                $repo::new(&mut self.conn)
            }
        }
    };
}

repo_handle!(UsersHandle, Users);
repo_handle!(ApiKeysHandle, ApiKeys);
repo_handle!(AgentsHandle, Agents);
repo_handle!(ExecutionsHandle, Executions);
repo_handle!(ExecutionLogsHandle, ExecutionLogs);
repo_handle!(WebhooksHandle, Webhooks);
