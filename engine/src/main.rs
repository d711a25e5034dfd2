mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use orchestra_cache::Cache;
use orchestra_core::{EventBus, ExecutionEngine, Scheduler, SubmissionGate, UrlHygienePolicy, WebhookDispatcher};
use orchestra_frameworks::FrameworkRegistry;
use orchestra_server::AppState;
use orchestra_store::Store;
use orchestra_types::execution::Trigger;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "orchestra-engine")]
#[command(about = "Agent Orchestra execution orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the HTTP API and every background loop (dispatch, webhook
    /// delivery, scheduler) for the life of the process.
    Serve,
    /// Runs the database migrations and exits, without binding a socket.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    };

    let cli = Cli::parse();

    let store = Store::connect(&config.database_url, 10).await.context("connecting to the database")?;
    store.migrate().await.context("running database migrations")?;

    match cli.command {
        Command::Migrate => {
            info!("migrations applied, exiting");
            return Ok(());
        }
        Command::Serve => run(config, store).await,
    }
}

async fn run(config: Config, store: Store) -> anyhow::Result<()> {
    let cache = Cache::connect(&config.redis_url).await.context("connecting to the cache")?;
    let bus = EventBus::with_remote_fanout(cache.clone());
    let frameworks = Arc::new(FrameworkRegistry::with_builtins(config.cerebras_api_key.clone()));
    let worker_id = format!("orchestra-engine-{}", uuid::Uuid::new_v4());

    let engine = ExecutionEngine::new(
        store.clone(),
        frameworks,
        bus.clone(),
        worker_id.clone(),
        Duration::from_secs(config.max_execution_time_secs),
        config.max_concurrent_executions,
    );

    match engine.reap_orphans().await {
        Ok(reaped) if reaped > 0 => info!(reaped, "reaped orphaned executions left over from a previous process"),
        Ok(_) => {}
        Err(err) => error!(error = %err, "failed to reap orphaned executions at boot"),
    }

    let dispatcher = WebhookDispatcher::new(store.clone(), worker_id.clone());
    let gate = SubmissionGate::new(store.clone(), cache.clone(), config.jwt_secret.clone(), config.rate_limit);
    let url_hygiene = UrlHygienePolicy { allow_localhost: config.allow_localhost_webhooks };

    let submit_engine = engine.clone();
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(move |agent_id, submitter| {
            let engine = submit_engine.clone();
            tokio::spawn(async move {
                let options = orchestra_core::SubmitOptions { trigger: Trigger::Scheduled, ..Default::default() };
                if let Err(err) = engine.submit(agent_id, submitter, serde_json::Value::Null, options).await {
                    error!(error = %err, "scheduled execution failed to submit");
                }
            });
        }),
    );

    let shutdown = CancellationToken::new();

    let dispatch_task = tokio::spawn(Arc::new(engine.clone()).run_dispatch_loop(shutdown.clone()));
    let webhook_ingest_task = tokio::spawn(dispatcher.clone().run_ingest_loop(bus.clone(), shutdown.clone()));
    let webhook_dispatch_task = tokio::spawn(dispatcher.run_dispatch_loop(shutdown.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let state = AppState::new(engine, store.clone(), cache.clone(), gate, url_hygiene);

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining in-flight requests");
        server_shutdown.cancel();
    });

    let result = orchestra_server::serve(config.addr, state, &config.allowed_origins, shutdown.clone()).await;

    shutdown.cancel();
    let _ = tokio::time::timeout(
        Duration::from_secs(config.shutdown_grace_secs),
        futures_join_all([dispatch_task, webhook_ingest_task, webhook_dispatch_task, scheduler_task]),
    )
    .await;

    result
}

async fn futures_join_all(tasks: [tokio::task::JoinHandle<()>; 4]) {
    for task in tasks {
        let _ = task.await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => futures::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
