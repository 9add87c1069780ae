//! HTTP server for TranscodeFlow
//!
//! Exposes service info, the readiness probe and pipeline metrics.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::{PipelineMetrics, SharedMetrics};
use crate::readiness::Readiness;

pub const SERVICE_NAME: &str = "TranscodeFlow";

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub readiness: Readiness,
    pub metrics: SharedMetrics,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    health_endpoint: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
}

/// Handler for GET /
async fn get_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        status: "running",
        health_endpoint: "/health",
    })
}

/// Handler for GET /health
/// 200 once ingestion has started, 503 before
async fn get_health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(HealthStatus { status: "healthy" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus { status: "starting" }),
        )
    }
}

/// Handler for GET /metrics
async fn get_metrics(State(state): State<AppState>) -> Json<PipelineMetrics> {
    let snapshot = state.metrics.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_info))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

/// Serves the router on `addr` until `shutdown` is cancelled
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve(listener, state, shutdown).await
}

/// Serves on an already bound listener
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "HTTP server listening");
    }

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
