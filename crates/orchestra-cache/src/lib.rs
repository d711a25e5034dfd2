//! The K/V cache + pub/sub component: fixed-window rate limiting, a
//! session-token blacklist, and lifecycle event fan-out for out-of-process
//! subscribers.

pub mod blacklist;
pub mod error;
pub mod pubsub;
pub mod rate_limit;

use futures::Stream;
use redis::aio::ConnectionManager;
use redis::Client;

pub use error::{CacheError, Result};
pub use rate_limit::RateLimitDecision;

#[derive(Clone)]
pub struct Cache {
    client: Client,
    manager: ConnectionManager,
}

impl Cache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }

    pub async fn check_rate_limit(&mut self, key: &str, limit: i64, window_secs: i64) -> RateLimitDecision {
        rate_limit::check_and_increment(&mut self.manager, key, limit, window_secs).await
    }

    pub async fn revoke_token(&mut self, jti: &str, ttl_secs: i64) -> Result<()> {
        blacklist::revoke(&mut self.manager, jti, ttl_secs).await
    }

    pub async fn is_token_revoked(&mut self, jti: &str) -> bool {
        blacklist::is_revoked(&mut self.manager, jti).await
    }

    pub async fn publish(&mut self, channel: &str, payload: &str) -> Result<()> {
        pubsub::publish(&mut self.manager, channel, payload).await
    }

    pub async fn subscribe(&self, channel: String) -> Result<impl Stream<Item = String>> {
        pubsub::subscribe(&self.client, channel).await
    }

    /// Round-trips a `PING`; used by the health endpoint to report the
    /// cache dependency's status without touching the rate limiter's keys.
    pub async fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.manager).await?;
        Ok(())
    }
}
