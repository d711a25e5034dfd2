use chrono::Utc;
use sqlx::PgConnection;
use tracing::instrument;

use orchestra_types::api_key::ApiKey;
use orchestra_types::ids::{abbrev, ApiKeyId, UserId};

use crate::error::Result;
use crate::rows::ApiKeyRow;

pub struct ApiKeys<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> ApiKeys<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, hashed_secret), fields(owner = %abbrev(&owner.0)), err)]
    pub async fn create(&mut self, owner: UserId, hashed_secret: &str, permissions: &[String]) -> Result<ApiKey> {
        let id = ApiKeyId::new();
        let row: ApiKeyRow = sqlx::query_as(
            r#"
            INSERT INTO api_keys (id, owner, hashed_secret, permissions)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(owner.0)
        .bind(hashed_secret)
        .bind(permissions)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.into())
    }

    /// Looked up by the hash of the bearer value presented on the wire;
    /// plaintext secrets are never stored or compared.
    #[instrument(skip(self, hashed_secret), err)]
    pub async fn get_by_hashed_secret(&mut self, hashed_secret: &str) -> Result<Option<ApiKey>> {
        let row: Option<ApiKeyRow> = sqlx::query_as("SELECT * FROM api_keys WHERE hashed_secret = $1")
            .bind(hashed_secret)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Records a successful admission: bumps `usage_count` and
    /// `last_used_at` atomically.
    #[instrument(skip(self), fields(api_key_id = %abbrev(&id.0)), err)]
    pub async fn record_use(&mut self, id: ApiKeyId) -> Result<()> {
        sqlx::query("UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = now() WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Auto-deactivates an expired key on first detection after expiry, per
    /// the submission-gate invariant that expired keys never admit twice.
    #[instrument(skip(self), fields(api_key_id = %abbrev(&id.0)), err)]
    pub async fn deactivate_if_expired(&mut self, id: ApiKeyId) -> Result<bool> {
        let result = sqlx::query("UPDATE api_keys SET active = false WHERE id = $1 AND expires_at IS NOT NULL AND expires_at <= $2")
            .bind(id.0)
            .bind(Utc::now())
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev(&id.0)), err)]
    pub async fn revoke(&mut self, id: ApiKeyId) -> Result<()> {
        sqlx::query("UPDATE api_keys SET active = false WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
