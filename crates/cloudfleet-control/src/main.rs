//! Cloudfleet supervisor - lock recovery and health service.
//!
//! This is the main entry point of the supervisor process. It opens the
//! store, runs the stale lock reaper and serves health and state table
//! endpoints until interrupted.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cloudfleet_control::reaper;
use cloudfleet_control::{ControlConfig, ControlPlane, ControlPlaneService, ResourceKind};
use cloudfleet_store::{RocksStore, Store};
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
struct AppState<S: Store> {
    control: Arc<ControlPlaneService<S>>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "cloudfleet-supervisor",
    })
}

async fn ready_handler<S: Store + 'static>(State(state): State<AppState<S>>) -> Response {
    match state.control.store().list_locked() {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Store not ready");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

async fn transitions_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(kind): Path<String>,
) -> Response {
    match kind.parse::<ResourceKind>() {
        Ok(kind) => Json(state.control.state_report(kind).await).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<S>))
        .route("/v1/kinds/:kind/transitions", get(transitions_handler::<S>))
        .with_state(state)
}

async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
    let _ = shutdown.send(true);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cloudfleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cloudfleet supervisor");

    let config = ControlConfig::from_env()?;
    tracing::info!(
        worker = %config.worker_id,
        allocator = %config.installation_allocator,
        "Loaded configuration"
    );

    // Initialize store
    let store = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir, "Initialized RocksDB store");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reaper_task = match config.lock_stale_after() {
        Some(threshold) => Some(tokio::spawn(reaper::run_reaper(
            Arc::clone(&store),
            threshold,
            config.poll_interval(),
            shutdown_rx.clone(),
        ))),
        None => {
            tracing::info!("Lock reaper disabled");
            None
        }
    };

    let listen_addr = config.listen_addr.clone();
    let control = Arc::new(ControlPlaneService::new(store, config));
    let app = create_router(AppState { control });

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    if let Some(task) = reaper_task {
        task.await?;
    }
    tracing::info!("Supervisor stopped");
    Ok(())
}
