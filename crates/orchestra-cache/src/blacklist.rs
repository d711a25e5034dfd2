use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

fn blacklist_key(jti: &str) -> String {
    format!("jwt:blacklist:{jti}")
}

/// Revokes a session token for the remainder of its lifetime. `ttl_secs`
/// should be the token's remaining `exp - now` so the blacklist entry never
/// outlives the token it guards.
pub async fn revoke(conn: &mut ConnectionManager, jti: &str, ttl_secs: i64) -> super::error::Result<()> {
    let _: () = conn.set_ex(blacklist_key(jti), 1, ttl_secs.max(1) as u64).await?;
    Ok(())
}

/// Fails open (treats the token as not blacklisted) on a Redis error, the
/// same availability trade the rate limiter makes — a session JWT's own
/// signature and expiry are still checked independently by the caller.
pub async fn is_revoked(conn: &mut ConnectionManager, jti: &str) -> bool {
    match conn.exists::<_, bool>(blacklist_key(jti)).await {
        Ok(exists) => exists,
        Err(err) => {
            warn!(error = %err, jti, "token blacklist unreachable, failing open");
            false
        }
    }
}
