use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

/// Outcome of a fixed-window rate-limit check. On a Redis error the gate
/// fails open (`allowed = true`) per the submission gate's availability
/// preference — favoring availability over strict enforcement is a
/// deliberate call, not an oversight, so callers should not retry on error.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Fixed-window counter: `INCR key`, and on the first increment in a window
/// `EXPIRE key window_secs`. The window boundary is whatever instant the key
/// was first touched, not a calendar-aligned clock tick.
pub async fn check_and_increment(
    conn: &mut ConnectionManager,
    key: &str,
    limit: i64,
    window_secs: i64,
) -> RateLimitDecision {
    match try_check_and_increment(conn, key, limit, window_secs).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(error = %err, key, "rate limiter unreachable, failing open");
            RateLimitDecision { allowed: true, remaining: limit, reset_at: Utc::now() + chrono::Duration::seconds(window_secs) }
        }
    }
}

async fn try_check_and_increment(
    conn: &mut ConnectionManager,
    key: &str,
    limit: i64,
    window_secs: i64,
) -> redis::RedisResult<RateLimitDecision> {
    let count: i64 = conn.incr(key, 1).await?;
    let ttl: i64 = if count == 1 {
        conn.expire(key, window_secs).await?;
        window_secs
    } else {
        let ttl: i64 = conn.ttl(key).await?;
        if ttl < 0 {
            conn.expire(key, window_secs).await?;
            window_secs
        } else {
            ttl
        }
    };
    let reset_at = Utc::now() + chrono::Duration::seconds(ttl);
    Ok(RateLimitDecision { allowed: count <= limit, remaining: (limit - count).max(0), reset_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_carries_a_future_reset_at_on_fail_open() {
        let now = Utc::now();
        let decision = RateLimitDecision { allowed: true, remaining: 5, reset_at: now + chrono::Duration::seconds(60) };
        assert!(decision.allowed);
        assert!(decision.reset_at > now);
    }
}
