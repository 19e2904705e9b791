//! Status API
//!
//! A small HTTP surface next to the served application:
//! - `GET /health` answers `OK` while the supervisor process is up
//! - `GET /status` returns the pipeline state and every worker slot

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use slipway_core::dto::status::SupervisorStatus;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::supervisor::SupervisorHandle;

/// GET /health
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
async fn get_status(State(handle): State<SupervisorHandle>) -> Json<SupervisorStatus> {
    Json(handle.status())
}

/// Create the status router
pub fn create_router(handle: SupervisorHandle) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .with_state(handle)
        .layer(TraceLayer::new_for_http())
}

/// Binds the status API and serves it in the background
pub async fn spawn_status_server(
    addr: SocketAddr,
    handle: SupervisorHandle,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status API to {}", addr))?;
    let local = listener.local_addr()?;

    info!("Status API listening on {}", local);

    let app = create_router(handle);
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Status API stopped: {}", e);
        }
    });

    Ok((local, task))
}
