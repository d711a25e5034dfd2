//! In-process fan-out for execution lifecycle events. One bus per process;
//! every subscriber gets every event published after it subscribes. A
//! subscriber that falls behind is dropped rather than allowed to slow down
//! publication — `broadcast`'s native lagged-receiver behavior is exactly
//! the slow-consumer isolation the event bus contract calls for.
//!
//! A bus constructed with [`EventBus::with_remote_fanout`] also relays every
//! event to the execution's Redis pub/sub channel, so a subscriber attached
//! to a different replica than the one running the execution still sees it.

use orchestra_cache::{pubsub, Cache};
use orchestra_types::Event;
use tokio::sync::{broadcast, mpsc};

const CHANNEL_CAPACITY: usize = 2048;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    remote: Option<mpsc::UnboundedSender<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, remote: None }
    }

    /// Also relays every published event to `execution:{id}:events` on
    /// `cache`, draining a single ordered queue so cross-process arrival
    /// order matches the order events were published in-process.
    pub fn with_remote_fanout(cache: Cache) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        tokio::spawn(relay_to_remote(cache, remote_rx));
        Self { tx, remote: Some(remote_tx) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Ignores the send error that occurs when there are currently no
    /// subscribers — an event with nobody listening is not a failure.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event.clone());
        if let Some(remote) = &self.remote {
            let _ = remote.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains queued events onto the cache's pub/sub channel one at a time, in
/// publish order. Best-effort: a failed publish is logged and the next
/// event is still relayed, since out-of-process fan-out is a convenience
/// for remote subscribers, not the bus's authority on delivery.
async fn relay_to_remote(mut cache: Cache, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        let channel = pubsub::execution_channel(&event.execution_id());
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(err) = cache.publish(&channel, &payload).await {
                    tracing::warn!(error = %err, "failed to relay event to remote pub/sub");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize event for remote pub/sub"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_types::ids::ExecutionId;

    #[tokio::test]
    async fn subscriber_receives_events_published_after_subscribing() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let execution_id = ExecutionId::new();
        bus.publish(Event::Cancelled { execution_id });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.execution_id(), execution_id);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::Cancelled { execution_id: ExecutionId::new() });
    }
}
