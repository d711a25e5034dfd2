use sqlx::PgConnection;
use tracing::instrument;

use orchestra_types::ids::{abbrev, UserId};
use orchestra_types::user::{Role, User};

use crate::error::Result;
use crate::rows::{role_str, UserRow};

pub struct Users<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self), fields(email = %email), err)]
    pub async fn create(&mut self, email: &str, display_name: &str, role: Role) -> Result<User> {
        let id = UserId::new();
        let row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, display_name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(email)
        .bind(display_name)
        .bind(role_str(role))
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.try_into()?)
    }

    #[instrument(skip(self), fields(user_id = %abbrev(&id.0)), err)]
    pub async fn get_by_id(&mut self, id: UserId) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_email(&mut self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// Cascade delete: owned agents (and transitively their executions and
    /// logs), api keys, and webhooks all carry `ON DELETE CASCADE` back to
    /// this row.
    #[instrument(skip(self), fields(user_id = %abbrev(&id.0)), err)]
    pub async fn delete(&mut self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev(&id.0)), err)]
    pub async fn set_active(&mut self, id: UserId, active: bool) -> Result<()> {
        sqlx::query("UPDATE users SET active = $2, updated_at = now() WHERE id = $1")
            .bind(id.0)
            .bind(active)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
