mod adapters;
mod api;
mod config;
mod engine;
mod error;
mod geo;
mod models;
mod observability;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.service.log_level.clone()))
        .with_target(false);
    if config.service.log_json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let (app_state, event_rx) = state::AppState::new(&config);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::dispatch::run_dispatch_engine(
        shared_state.dispatch.clone(),
        shared_state.metrics.clone(),
        event_rx,
    ));
    tokio::spawn(engine::lifecycle::run_pool_sweeper(
        shared_state.pool.clone(),
        Duration::from_secs(config.service.pool_sweep_interval_seconds.max(1)),
    ));
    tokio::spawn(adapters::store::run_store_purger(
        shared_state.store.clone(),
        Duration::from_secs(config.service.store_purge_interval_seconds.max(1)),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.service.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.service.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
