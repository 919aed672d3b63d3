use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_orchestrator::config::{Config, StoreKind};
use sluice_orchestrator::dispatcher::delivery::DeliveryPump;
use sluice_orchestrator::dispatcher::memory::InMemoryTaskQueue;
use sluice_orchestrator::dispatcher::postgres::PgTaskQueue;
use sluice_orchestrator::dispatcher::{Dispatcher, TaskQueue};
use sluice_orchestrator::repository::Repositories;
use sluice_orchestrator::service::schedule_service;
use sluice_orchestrator::state::AppState;
use sluice_orchestrator::{api, db};
use sluice_worker::WorkerRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_orchestrator=debug,sluice_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sluice Orchestrator...");

    let config = Config::from_env().context("Failed to read configuration")?;
    config.validate().context("Invalid configuration")?;

    let (repos, queue): (Repositories, Arc<dyn TaskQueue>) = match config.store {
        StoreKind::Postgres => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            tracing::info!("Database ready");

            let queue: Arc<dyn TaskQueue> = Arc::new(PgTaskQueue::new(pool.clone()));
            (Repositories::postgres(pool), queue)
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store, state is lost on restart");
            let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
            (Repositories::in_memory(), queue)
        }
    };

    let workers = WorkerRegistry::standard(reqwest::Client::new(), config.poll_schedule());
    tracing::info!("Registered workers: {}", workers.names().join(", "));

    let dispatcher = Dispatcher::new(Arc::clone(&queue));
    let state = AppState::new(
        repos,
        dispatcher.clone(),
        workers,
        config.engine_settings(),
        config.push_token.clone(),
    );

    Arc::new(DeliveryPump::new(queue, &config)).spawn();

    if config.scheduler_enabled {
        schedule_service::spawn_scheduler(dispatcher);
    }

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
