use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use tracing::instrument;

use orchestra_types::ids::{abbrev, UserId, WebhookDeliveryId, WebhookId};
use orchestra_types::webhook::{Webhook, AUTO_DISABLE_THRESHOLD};
use orchestra_types::webhook_delivery::WebhookDelivery;

use crate::error::Result;
use crate::rows::{WebhookDeliveryRow, WebhookRow};

pub struct Webhooks<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Webhooks<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, secret), fields(owner = %abbrev(&owner.0)), err)]
    pub async fn create(&mut self, owner: UserId, url: &str, secret: &str, subscribed_events: &[String]) -> Result<Webhook> {
        let id = WebhookId::new();
        let row: WebhookRow = sqlx::query_as(
            r#"
            INSERT INTO webhooks (id, owner, url, secret, subscribed_events)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(owner.0)
        .bind(url)
        .bind(secret)
        .bind(subscribed_events)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.into())
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev(&id.0)), err)]
    pub async fn get_by_id(&mut self, id: WebhookId) -> Result<Option<Webhook>> {
        let row: Option<WebhookRow> = sqlx::query_as("SELECT * FROM webhooks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(owner = %abbrev(&owner.0)), err)]
    pub async fn list_by_owner(&mut self, owner: UserId) -> Result<Vec<Webhook>> {
        let rows: Vec<WebhookRow> = sqlx::query_as("SELECT * FROM webhooks WHERE owner = $1 ORDER BY created_at DESC")
            .bind(owner.0)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Active webhooks belonging to `owner` subscribed to `event_type`;
    /// the dispatcher enumerates this set on every lifecycle event.
    #[instrument(skip(self), fields(owner = %abbrev(&owner.0), event_type = %event_type), err)]
    pub async fn active_subscribers(&mut self, owner: UserId, event_type: &str) -> Result<Vec<Webhook>> {
        let rows: Vec<WebhookRow> = sqlx::query_as(
            r#"
            SELECT * FROM webhooks
            WHERE owner = $1 AND active = true
              AND EXISTS (
                  SELECT 1 FROM unnest(subscribed_events) AS pattern
                  WHERE $2 LIKE replace(pattern, '*', '%')
              )
            "#,
        )
        .bind(owner.0)
        .bind(event_type)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev(&id.0)), err)]
    pub async fn update(&mut self, id: WebhookId, url: Option<&str>, subscribed_events: Option<&[String]>) -> Result<Option<Webhook>> {
        let row: Option<WebhookRow> = sqlx::query_as(
            r#"
            UPDATE webhooks
            SET url = COALESCE($2, url),
                subscribed_events = COALESCE($3, subscribed_events),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(url)
        .bind(subscribed_events)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, new_secret), fields(webhook_id = %abbrev(&id.0)), err)]
    pub async fn rotate_secret(&mut self, id: WebhookId, new_secret: &str) -> Result<Option<Webhook>> {
        let row: Option<WebhookRow> = sqlx::query_as("UPDATE webhooks SET secret = $2, updated_at = now() WHERE id = $1 RETURNING *")
            .bind(id.0)
            .bind(new_secret)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev(&id.0)), err)]
    pub async fn delete(&mut self, id: WebhookId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1").bind(id.0).execute(&mut *self.conn).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Recomputes the trailing-24h failed-delivery count from
    /// `webhook_deliveries` and trips the circuit breaker atomically when it
    /// reaches the threshold, so a concurrent dispatcher worker can never
    /// observe a webhook as `active` past its 10th failure in the window.
    /// The caller's own just-failed delivery is already visible to this
    /// count: `mark_failed` commits the terminal `failed` row before this
    /// is called.
    #[instrument(skip(self), fields(webhook_id = %abbrev(&id.0)), err)]
    pub async fn record_failure(&mut self, id: WebhookId, window_start: DateTime<Utc>) -> Result<Webhook> {
        let row: WebhookRow = sqlx::query_as(
            r#"
            WITH window_failures AS (
                SELECT count(*) AS failed FROM webhook_deliveries
                WHERE webhook_id = $1 AND status = 'failed' AND failed_at >= $2
            )
            UPDATE webhooks
            SET
                consecutive_failures_window = (SELECT failed FROM window_failures),
                active = CASE WHEN (SELECT failed FROM window_failures) >= $3 THEN false ELSE active END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(window_start)
        .bind(AUTO_DISABLE_THRESHOLD)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.into())
    }

    /// A successful delivery doesn't erase prior failures still inside the
    /// trailing 24h window — only their age does — so this only refreshes
    /// `updated_at` rather than zeroing the failure count.
    #[instrument(skip(self), fields(webhook_id = %abbrev(&id.0)), err)]
    pub async fn record_success(&mut self, id: WebhookId) -> Result<()> {
        sqlx::query("UPDATE webhooks SET updated_at = now() WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    // ---- deliveries ----

    #[instrument(skip(self, payload), fields(webhook_id = %abbrev(&webhook_id.0)), err)]
    pub async fn enqueue_delivery(
        &mut self,
        webhook_id: WebhookId,
        event_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<WebhookDelivery> {
        let id = WebhookDeliveryId::new();
        let row: WebhookDeliveryRow = sqlx::query_as(
            r#"
            INSERT INTO webhook_deliveries (id, webhook_id, event_id, event_type, payload, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(webhook_id.0)
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.try_into()?)
    }

    /// Claims due deliveries FIFO per webhook using `FOR UPDATE SKIP
    /// LOCKED`, transitioning them to `delivering` in the same statement so
    /// two dispatcher replicas never send the same delivery twice.
    #[instrument(skip(self), fields(worker = %worker), err)]
    pub async fn claim_due(&mut self, worker: &str, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let rows: Vec<WebhookDeliveryRow> = sqlx::query_as(
            r#"
            WITH claimed AS (
                SELECT id FROM webhook_deliveries
                WHERE status IN ('pending', 'retry') AND scheduled_at <= now()
                ORDER BY webhook_id, scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_deliveries d
            SET status = 'delivering', attempt_count = attempt_count + 1,
                locked_by = $1, locked_until = now() + interval '5 minutes'
            FROM claimed
            WHERE d.id = claimed.id
            RETURNING d.*
            "#,
        )
        .bind(worker)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(delivery_id = %abbrev(&id.0)), err)]
    pub async fn mark_delivered(&mut self, id: WebhookDeliveryId, status_code: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivered', delivered_at = now(), last_status_code = $2, last_error = NULL,
                locked_by = NULL, locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status_code)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// `attempt_count` was already incremented at claim time; this decides
    /// whether the delivery gets another try (`retry`, rescheduled with the
    /// `2^attemptCount` backoff) or is abandoned (`failed`) at the 5-attempt
    /// cap.
    #[instrument(skip(self, error), fields(delivery_id = %abbrev(&id.0)), err)]
    pub async fn mark_failed(
        &mut self,
        id: WebhookDeliveryId,
        status_code: Option<i32>,
        error: &str,
        attempt_count: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        use orchestra_types::webhook_delivery::MAX_DELIVERY_ATTEMPTS;
        if attempt_count >= MAX_DELIVERY_ATTEMPTS {
            sqlx::query(
                r#"
                UPDATE webhook_deliveries
                SET status = 'failed', failed_at = now(), last_status_code = $2, last_error = $3,
                    locked_by = NULL, locked_until = NULL
                WHERE id = $1
                "#,
            )
            .bind(id.0)
            .bind(status_code)
            .bind(error)
            .execute(&mut *self.conn)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE webhook_deliveries
                SET status = 'retry', scheduled_at = $4, last_status_code = $2, last_error = $3,
                    locked_by = NULL, locked_until = NULL
                WHERE id = $1
                "#,
            )
            .bind(id.0)
            .bind(status_code)
            .bind(error)
            .bind(next_attempt_at)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev(&webhook_id.0)), err)]
    pub async fn count_failed_in_window(&mut self, webhook_id: WebhookId, since: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM webhook_deliveries WHERE webhook_id = $1 AND status = 'failed' AND failed_at >= $2",
        )
        .bind(webhook_id.0)
        .bind(since)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev(&webhook_id.0)), err)]
    pub async fn list_deliveries(&mut self, webhook_id: WebhookId, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let rows: Vec<WebhookDeliveryRow> = sqlx::query_as(
            "SELECT * FROM webhook_deliveries WHERE webhook_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(webhook_id.0)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Weekly cleanup sweep: delivered/failed rows older than the audit
    /// retention window.
    #[instrument(skip(self), err)]
    pub async fn delete_delivered_before(&mut self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM webhook_deliveries WHERE status IN ('delivered', 'failed') AND created_at < $1",
        )
        .bind(before)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected())
    }
}
