//! The Webhook Dispatcher: turns lifecycle events into
//! signed, retried HTTP deliveries, claimed from the same
//! `FOR UPDATE SKIP LOCKED` outbox pattern the execution queue uses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestra_store::Store;
use orchestra_types::webhook_delivery::MAX_DELIVERY_ATTEMPTS;
use orchestra_types::Event;
use reqwest::redirect::Policy;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::observability;
use crate::signing;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "AgentOrchestra/1.0";

#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Store,
    client: reqwest::Client,
    worker_id: Arc<str>,
    claim_batch_size: i64,
    poll_interval: Duration,
}

impl WebhookDispatcher {
    pub fn new(store: Store, worker_id: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .expect("static reqwest client configuration is always valid");
        Self {
            store,
            client,
            worker_id: Arc::from(worker_id.into_boxed_str()),
            claim_batch_size: 20,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Subscribes to the event bus directly: every published event is
    /// translated into a webhook delivery for each of the owning user's
    /// matching, active webhooks. Runs for the life of the process
    /// alongside `run_dispatch_loop`.
    pub async fn run_ingest_loop(self, bus: EventBus, shutdown: CancellationToken) {
        let mut rx = bus.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("webhook ingest loop shutting down");
                    break;
                }
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if let Err(err) = self.enqueue_for_event(&event).await {
                                warn!(error = %err, "failed to enqueue webhook deliveries for event");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    /// Looks up the execution's owner, enumerates their active webhooks
    /// subscribed to `event.type_name()`, and enqueues one pending delivery
    /// per match.
    async fn enqueue_for_event(&self, event: &Event) -> anyhow::Result<()> {
        let execution = self
            .store
            .executions()
            .await?
            .repo()
            .get_by_id(event.execution_id())
            .await?;
        let Some(execution) = execution else { return Ok(()) };

        let event_type = event.type_name();
        let payload = serde_json::json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "type": event_type,
            "data": event,
            "timestamp": Utc::now().to_rfc3339(),
            "source": "agent-orchestra",
        });

        let mut handle = self.store.webhooks().await?;
        let repo = handle.repo();
        let subscribers = repo.active_subscribers(execution.submitted_by, event_type).await?;
        for webhook in subscribers {
            let event_id = payload["id"].as_str().unwrap_or_default().to_string();
            repo.enqueue_delivery(webhook.id, &event_id, event_type, payload.clone()).await?;
        }
        Ok(())
    }

    pub async fn run_dispatch_loop(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("webhook dispatch loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.dispatch_once().await {
                        warn!(error = %err, "webhook dispatch tick failed");
                    }
                }
            }
        }
    }

    async fn dispatch_once(&self) -> anyhow::Result<()> {
        let claimed = self.store.webhooks().await?.repo().claim_due(&self.worker_id, self.claim_batch_size).await?;
        for delivery in claimed {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.deliver(delivery).await;
            });
        }
        Ok(())
    }

    async fn deliver(&self, delivery: orchestra_types::WebhookDelivery) {
        let Some(webhook) = self.fetch_webhook(delivery.webhook_id).await else {
            warn!(delivery_id = %delivery.id, "delivery references a webhook that no longer exists");
            return;
        };

        let timestamp = Utc::now().timestamp();
        let canonical_payload = delivery.payload.to_string();
        let signature = signing::sign(&webhook.secret, timestamp, &canonical_payload);

        let response = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", delivery.event_type.clone())
            .header("X-Webhook-Delivery", delivery.id.to_string())
            .header("X-Webhook-Timestamp", timestamp.to_string())
            .header("X-Webhook-Signature", signature)
            .header("User-Agent", USER_AGENT)
            .body(canonical_payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let status_code = resp.status().as_u16() as i32;
                if let Ok(mut handle) = self.store.webhooks().await {
                    let _ = handle.repo().mark_delivered(delivery.id, status_code).await;
                    let _ = handle.repo().record_success(webhook.id).await;
                }
                observability::webhook_event(tracing::Level::INFO, webhook.id, "delivery succeeded");
            }
            Ok(resp) => {
                let status_code = resp.status().as_u16() as i32;
                self.handle_failure(&delivery, &webhook.id, Some(status_code), &format!("received status {status_code}")).await;
            }
            Err(err) => {
                self.handle_failure(&delivery, &webhook.id, None, &err.to_string()).await;
            }
        }
    }

    async fn handle_failure(&self, delivery: &orchestra_types::WebhookDelivery, webhook_id: &orchestra_types::ids::WebhookId, status_code: Option<i32>, error: &str) {
        let next_attempt_at = Utc::now() + chrono::Duration::seconds(orchestra_types::WebhookDelivery::backoff_secs(delivery.attempt_count));
        let Ok(mut handle) = self.store.webhooks().await else { return };
        let repo = handle.repo();
        let _ = repo.mark_failed(delivery.id, status_code, error, delivery.attempt_count, next_attempt_at).await;

        if delivery.attempt_count >= MAX_DELIVERY_ATTEMPTS {
            observability::webhook_event(tracing::Level::WARN, *webhook_id, "delivery exhausted all attempts");
            let window_start = Utc::now() - chrono::Duration::hours(24);
            if let Ok(webhook) = repo.record_failure(*webhook_id, window_start).await {
                if webhook.should_auto_disable() {
                    observability::webhook_event(tracing::Level::WARN, *webhook_id, "webhook auto-disabled after repeated failures");
                }
            }
        } else {
            observability::webhook_event(tracing::Level::WARN, *webhook_id, &format!("delivery failed, will retry: {error}"));
        }
    }

    async fn fetch_webhook(&self, webhook_id: orchestra_types::ids::WebhookId) -> Option<orchestra_types::Webhook> {
        self.store.webhooks().await.ok()?.repo().get_by_id(webhook_id).await.ok().flatten()
    }
}
