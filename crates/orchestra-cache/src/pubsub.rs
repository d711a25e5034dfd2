use futures::Stream;
use redis::AsyncCommands;

use crate::error::Result;

pub fn execution_channel(execution_id: &orchestra_types::ids::ExecutionId) -> String {
    format!("execution:{}:events", execution_id.0)
}

/// Publishes a serialized `Event` to its execution's channel for
/// out-of-process subscribers (the realtime fan-out layer on another
/// replica); in-process subscribers go through the broadcast bus directly
/// and never touch Redis.
pub async fn publish(conn: &mut redis::aio::ConnectionManager, channel: &str, payload: &str) -> Result<()> {
    let _: () = conn.publish(channel, payload).await?;
    Ok(())
}

/// Opens a dedicated pub/sub connection and subscribes to `channel`,
/// returning a stream of raw message payloads. A `ConnectionManager` cannot
/// itself enter subscriber mode, so this takes the `Client` directly and
/// establishes a connection scoped to the subscription's lifetime —
/// dropping the returned stream drops the connection and implicitly
/// unsubscribes.
pub async fn subscribe(client: &redis::Client, channel: String) -> Result<impl Stream<Item = String>> {
    let mut pubsub_conn = client.get_async_pubsub().await?;
    pubsub_conn.subscribe(&channel).await?;
    Ok(async_stream::stream! {
        let mut stream = pubsub_conn.into_on_message();
        while let Some(msg) = futures::StreamExt::next(&mut stream).await {
            if let Ok(payload) = msg.get_payload::<String>() {
                yield payload;
            }
        }
    })
}
