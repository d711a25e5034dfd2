//! The Submission Gate: the two authentication paths, the
//! capability check, and the fixed-window rate limiter that together admit
//! or reject a request before it ever reaches the execution engine.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use orchestra_cache::Cache;
use orchestra_store::Store;
use orchestra_types::api_key::API_KEY_PREFIX;
use orchestra_types::ids::UserId;
use orchestra_types::user::has_capability;
use orchestra_types::{OrchestraError, User};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Claims embedded in a session bearer JWT. `jti` is checked against the
/// token blacklist on every request so a revoked session stops admitting
/// immediately rather than waiting for expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,
    pub exp: usize,
    pub jti: String,
}

/// Identity admitted by the gate, carrying whatever capability set applies
/// — a session's implicit full access or an API key's explicit grant.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_secs: i64,
    pub max_requests: i64,
}

impl Default for RateLimitConfig {
    /// 15 minutes / 100 requests, the default for the general API.
    fn default() -> Self {
        Self { window_secs: 900, max_requests: 100 }
    }
}

#[derive(Clone)]
pub struct SubmissionGate {
    store: Store,
    cache: Cache,
    jwt_secret: String,
    rate_limit: RateLimitConfig,
}

impl SubmissionGate {
    pub fn new(store: Store, cache: Cache, jwt_secret: String, rate_limit: RateLimitConfig) -> Self {
        Self { store, cache, jwt_secret, rate_limit }
    }

    pub fn issue_session_token(&self, user_id: UserId, ttl_secs: i64) -> Result<String, OrchestraError> {
        let claims = SessionClaims {
            sub: user_id,
            exp: (Utc::now().timestamp() + ttl_secs) as usize,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .map_err(|e| OrchestraError::Internal(format!("failed to sign session token: {e}")))
    }

    /// Verifies a session bearer token: signature, expiry, blacklist, and
    /// the user's own `active` flag, in that order.
    pub async fn authenticate_session(&mut self, token: &str) -> Result<Identity, OrchestraError> {
        let claims = jsonwebtoken::decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| OrchestraError::Unauthorized(format!("invalid session token: {e}")))?
        .claims;

        if self.cache.is_token_revoked(&claims.jti).await {
            return Err(OrchestraError::Unauthorized("session token has been revoked".to_string()));
        }

        let user = self
            .store
            .users()
            .await
            .map_err(store_unavailable)?
            .repo()
            .get_by_id(claims.sub)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| OrchestraError::Unauthorized("session user no longer exists".to_string()))?;

        if !user.active {
            return Err(OrchestraError::Unauthorized("account is deactivated".to_string()));
        }

        // A session identity carries full access; only API keys grant an
        // explicit, narrower capability set.
        Ok(Identity { user, capabilities: vec![orchestra_types::user::ADMIN_ALL.to_string()] })
    }

    /// Hashes the presented secret and looks it up; auto-deactivates a key
    /// discovered to be expired on this very lookup.
    pub async fn authenticate_api_key(&mut self, bearer_value: &str) -> Result<Identity, OrchestraError> {
        let secret = bearer_value
            .strip_prefix(API_KEY_PREFIX)
            .ok_or_else(|| OrchestraError::Unauthorized("malformed API key".to_string()))?;
        let hashed = hash_api_key(secret);

        let mut handle = self.store.api_keys().await.map_err(store_unavailable)?;
        let repo = handle.repo();
        let api_key = repo
            .get_by_hashed_secret(&hashed)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| OrchestraError::Unauthorized("unknown API key".to_string()))?;

        let now = Utc::now();
        if api_key.is_expired(now) && api_key.active {
            repo.deactivate_if_expired(api_key.id).await.map_err(store_unavailable)?;
        }
        if !api_key.admits(now) {
            return Err(OrchestraError::Unauthorized("API key is inactive or expired".to_string()));
        }
        repo.record_use(api_key.id).await.map_err(store_unavailable)?;

        let user = self
            .store
            .users()
            .await
            .map_err(store_unavailable)?
            .repo()
            .get_by_id(api_key.owner)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| OrchestraError::Internal("API key owner no longer exists".to_string()))?;

        if !user.active {
            return Err(OrchestraError::Unauthorized("account is deactivated".to_string()));
        }

        Ok(Identity { user, capabilities: api_key.permissions })
    }

    pub fn authorize(&self, identity: &Identity, required_capability: &str) -> Result<(), OrchestraError> {
        if has_capability(&identity.capabilities, required_capability) {
            Ok(())
        } else {
            Err(OrchestraError::Unauthorized(format!("missing capability `{required_capability}`")))
        }
    }

    /// `auth:login`-style callers pass a stricter override; general API
    /// callers use the gate's configured default.
    pub async fn check_rate_limit(&mut self, identifier: &str) -> Result<(), OrchestraError> {
        self.check_rate_limit_with(identifier, self.rate_limit.max_requests, self.rate_limit.window_secs).await
    }

    pub async fn check_rate_limit_with(&mut self, identifier: &str, limit: i64, window_secs: i64) -> Result<(), OrchestraError> {
        let decision = self.cache.check_rate_limit(identifier, limit, window_secs).await;
        if decision.allowed {
            Ok(())
        } else {
            Err(OrchestraError::RateLimited { reset_at: decision.reset_at })
        }
    }

    pub async fn revoke_session(&mut self, jti: &str, ttl_secs: i64) -> Result<(), OrchestraError> {
        self.cache.revoke_token(jti, ttl_secs).await.map_err(|e| OrchestraError::Transient(e.to_string()))
    }
}

pub fn hash_api_key(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn store_unavailable(err: orchestra_store::StoreError) -> OrchestraError {
    OrchestraError::Transient(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_hash_is_deterministic() {
        assert_eq!(hash_api_key("secret"), hash_api_key("secret"));
        assert_ne!(hash_api_key("secret"), hash_api_key("other"));
    }
}
