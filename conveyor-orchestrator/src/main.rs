//! Conveyor Orchestrator
//!
//! HTTP service that stores pipelines and runs their executions.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: PostgreSQL access for pipelines and executions
//! - Engine: runs executions in-process (clone, checkout, build, test, deploy)
//! - API: axum routes, including a server-sent events feed per execution
//!
//! On startup, executions left in flight by a previous process are failed
//! before the API starts accepting requests.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod store;

use crate::api::AppState;
use crate::config::Config;
use crate::store::PgRecordStore;
use conveyor_runner::{BroadcastPublisher, Engine, ExecutionRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conveyor_orchestrator=debug,conveyor_runner=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor Orchestrator...");

    let config = load_config()?;
    info!(
        "Loaded configuration: bind_addr={}, workspace_root={}",
        config.bind_addr,
        config.engine.workspace_root.display()
    );

    info!("Connecting to database...");
    let pool = connect_with_retry(&config.database_url).await?;
    info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let events = BroadcastPublisher::default();
    let engine = Engine::new(
        config.engine.clone(),
        Arc::new(PgRecordStore::new(pool.clone())),
        Arc::new(events.clone()),
        Arc::new(ExecutionRegistry::new()),
    );

    let orphans = engine
        .reconcile_orphans(config.orphan_staleness)
        .await
        .context("Failed to reconcile orphaned executions")?;
    if orphans > 0 {
        warn!("Failed {} executions orphaned by a previous run", orphans);
    }

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        pool,
        engine: engine.clone(),
        events,
    });

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    drain_executions(&engine, config.engine.termination_grace).await;
    info!("Orchestrator stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Connects to the database with exponential backoff
///
/// The database may still be starting when the orchestrator comes up
/// (common in container environments).
async fn connect_with_retry(database_url: &str) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match db::create_pool(database_url).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to database after {} attempts", MAX_RETRIES);
                    return Err(e).context("Failed to create database pool");
                }

                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Cancels in-flight executions and waits for them to finalize
async fn drain_executions(engine: &Engine, grace: Duration) {
    let registry = engine.registry();
    let active = registry.active_ids();
    if active.is_empty() {
        return;
    }

    info!("Cancelling {} in-flight executions", active.len());
    for id in active {
        engine.cancel(id);
    }

    let deadline = tokio::time::Instant::now() + grace + Duration::from_secs(5);
    while !registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if !registry.is_empty() {
        warn!(
            "{} executions still running at shutdown; they will be reconciled on next start",
            registry.len()
        );
    }
}
