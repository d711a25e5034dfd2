//! Environment-variable configuration. Every field is validated up front so
//! a misconfigured deployment fails fast, before a socket is ever opened or
//! a database connection attempted.

use std::net::SocketAddr;

use orchestra_core::RateLimitConfig;

const MIN_SECRET_LEN: usize = 32;

pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub api_secret_key: String,
    pub encryption_key: String,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub max_execution_time_secs: u64,
    pub max_concurrent_executions: usize,
    pub shutdown_grace_secs: u64,
    pub cerebras_api_key: Option<String>,
    pub allow_localhost_webhooks: bool,
}

/// Accumulates every field's validation failure instead of stopping at the
/// first, so an operator fixing a deployment sees the whole list at once.
struct Errors(Vec<String>);

impl Errors {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    fn into_result(self) -> anyhow::Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", self.0.join("\n  - "))
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut errors = Errors::new();

        let port: u16 = env_or("PORT", "8080").parse().unwrap_or_else(|_| {
            errors.push("PORT must be a valid port number");
            8080
        });
        let hostname = env_or("HOSTNAME", "0.0.0.0");
        let addr: SocketAddr = format!("{hostname}:{port}").parse().unwrap_or_else(|_| {
            errors.push(format!("HOSTNAME `{hostname}` is not a valid bind address"));
            SocketAddr::from(([0, 0, 0, 0], port))
        });

        let database_url = require_env(&mut errors, "DATABASE_URL");
        let redis_url = require_env(&mut errors, "REDIS_URL");
        let jwt_secret = require_secret(&mut errors, "JWT_SECRET");
        let api_secret_key = require_secret(&mut errors, "API_SECRET_KEY");
        let encryption_key = require_hex_secret(&mut errors, "ENCRYPTION_KEY");

        let allowed_origins: Vec<String> = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if allowed_origins.is_empty() {
            errors.push("ALLOWED_ORIGINS must list at least one origin");
        }

        let rate_limit_window_ms: i64 = env_or("RATE_LIMIT_WINDOW_MS", "900000").parse().unwrap_or_else(|_| {
            errors.push("RATE_LIMIT_WINDOW_MS must be an integer number of milliseconds");
            900_000
        });
        let rate_limit_max_requests: i64 = env_or("RATE_LIMIT_MAX_REQUESTS", "100").parse().unwrap_or_else(|_| {
            errors.push("RATE_LIMIT_MAX_REQUESTS must be a positive integer");
            100
        });
        if rate_limit_max_requests <= 0 {
            errors.push("RATE_LIMIT_MAX_REQUESTS must be greater than zero");
        }

        let max_execution_time_secs: u64 = env_or("MAX_EXECUTION_TIME", "60").parse().unwrap_or_else(|_| {
            errors.push("MAX_EXECUTION_TIME must be a positive integer number of seconds");
            60
        });
        let max_concurrent_executions: usize = env_or("MAX_CONCURRENT_EXECUTIONS", "50").parse().unwrap_or_else(|_| {
            errors.push("MAX_CONCURRENT_EXECUTIONS must be a positive integer");
            50
        });
        let shutdown_grace_secs: u64 = env_or("SHUTDOWN_GRACE", "30").parse().unwrap_or_else(|_| {
            errors.push("SHUTDOWN_GRACE must be a positive integer number of seconds");
            30
        });

        let cerebras_api_key = std::env::var("CEREBRAS_API_KEY").ok().filter(|v| !v.trim().is_empty());
        let allow_localhost_webhooks = env_or("ALLOW_LOCALHOST_WEBHOOKS", "false").eq_ignore_ascii_case("true");

        errors.into_result()?;

        Ok(Self {
            addr,
            database_url,
            redis_url,
            jwt_secret,
            api_secret_key,
            encryption_key,
            allowed_origins,
            rate_limit: RateLimitConfig { window_secs: rate_limit_window_ms / 1000, max_requests: rate_limit_max_requests },
            max_execution_time_secs,
            max_concurrent_executions,
            shutdown_grace_secs,
            cerebras_api_key,
            allow_localhost_webhooks,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(errors: &mut Errors, key: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => {
            errors.push(format!("{key} is required"));
            String::new()
        }
    }
}

fn require_secret(errors: &mut Errors, key: &str) -> String {
    let value = require_env(errors, key);
    if !value.is_empty() && value.len() < MIN_SECRET_LEN {
        errors.push(format!("{key} must be at least {MIN_SECRET_LEN} bytes"));
    }
    value
}

fn require_hex_secret(errors: &mut Errors, key: &str) -> String {
    let value = require_secret(errors, key);
    if !value.is_empty() && !value.chars().all(|c| c.is_ascii_hexdigit()) {
        errors.push(format!("{key} must be hex-encoded"));
    }
    value
}
