//! The axum HTTP API: executions, webhooks, and the health endpoint, plus
//! the auth/rate-limit/CORS/tracing middleware stack shared by all of them.

pub mod auth;
pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use orchestra_cache::Cache;
use orchestra_core::{ExecutionEngine, SubmissionGate, UrlHygienePolicy};
use orchestra_store::Store;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
    pub store: Store,
    pub cache: Cache,
    pub gate: SubmissionGate,
    pub url_hygiene: Arc<UrlHygienePolicy>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: ExecutionEngine, store: Store, cache: Cache, gate: SubmissionGate, url_hygiene: UrlHygienePolicy) -> Self {
        Self { engine, store, cache, gate, url_hygiene: Arc::new(url_hygiene), started_at: Utc::now() }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// `/health` is unversioned (it's a liveness probe, not a client-facing
/// resource); everything else is versioned under `/api` per spec.
pub fn app_router(state: AppState, allowed_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/executions", post(routes::executions::submit))
        .route("/executions/{id}", get(routes::executions::detail).delete(routes::executions::cancel))
        .route("/executions/{id}/logs", get(routes::executions::logs))
        .route("/executions/{id}/stream", get(routes::executions::stream))
        .route("/webhooks", post(routes::webhooks::create))
        .route("/webhooks/{id}", put(routes::webhooks::update).delete(routes::webhooks::delete))
        .route("/webhooks/{id}/stats", get(routes::webhooks::stats));

    Router::new()
        .nest("/api", api)
        .route("/health", get(routes::health::health))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the API for the life of the process. The engine's
/// dispatch loop, the webhook dispatcher's loops, and the scheduler are
/// separate long-lived tasks the binary wires up alongside this one;
/// `shutdown` cancelling stops this future from accepting further
/// connections once in-flight requests drain.
pub async fn serve(addr: SocketAddr, state: AppState, allowed_origins: &[String], shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = app_router(state, allowed_origins);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "orchestra-server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    Ok(())
}
