mod api;
mod config;
mod monitor;
mod store;
mod store_manager;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::monitor::{GlobalpingProvider, ProbeExecutor, ScheduleRegistry};
use crate::store::db::StoreDb;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("monitord=info"))
        )
        .init();

    tracing::info!("Starting monitord");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/monitord/monitord.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Open SQLite database; migrations run before anything can read it
    let db = StoreDb::open(&config.store.db_path)?;
    tracing::info!(
        "Opened database at {:?} (schema version {})",
        config.store.db_path,
        db.schema_version()?
    );

    let store = StoreHandle::spawn(db);

    let provider = GlobalpingProvider::new(&config.provider)?;
    if provider.is_authenticated() {
        tracing::info!("Measurement provider API key found, using authenticated access");
    } else {
        tracing::warn!(
            "{} is not set, using anonymous access with limited requests",
            config::API_KEY_ENV
        );
    }

    let executor = ProbeExecutor::new(Arc::new(provider), config.provider.probe_timeout());
    let scheduler = ScheduleRegistry::new(Arc::new(store.clone()), executor);

    // Recovery: arm every stored service, catching up the overdue ones
    scheduler
        .initialize_all()
        .await
        .context("Failed to initialize monitoring schedules")?;

    let cancel = CancellationToken::new();

    let app = api::routes::router(api::routes::AppState {
        store: store.clone(),
        scheduler: scheduler.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = server_handle.await;

    scheduler.shutdown();

    if let Err(e) = store.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
