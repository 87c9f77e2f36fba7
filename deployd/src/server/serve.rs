//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::edge::{edge_router, EdgeState};
use crate::errors::DeployError;
use crate::server::handlers::{
    append_logs_handler, get_deployment_handler, get_project_handler, health_handler,
    list_deployments_handler, list_logs_handler, register_project_handler,
    start_deployment_handler, update_deployment_status_handler, version_handler,
};
use crate::server::state::ServerState;

/// Orchestrator procedure surface
pub fn api_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route("/projects", post(register_project_handler))
        .route("/projects/{id}", get(get_project_handler))
        .route(
            "/projects/{id}/deployments",
            post(start_deployment_handler).get(list_deployments_handler),
        )
        .route(
            "/projects/{id}/logs",
            post(append_logs_handler).get(list_logs_handler),
        )
        // Deployments
        .route("/deployments/{id}", get(get_deployment_handler))
        .route(
            "/deployments/{id}/status",
            patch(update_deployment_status_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the orchestrator API server
pub async fn serve_api(
    host: &str,
    port: u16,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    info!("Starting API server on {}:{}", host, port);
    spawn_server(host, port, api_router(state), shutdown_signal).await
}

/// Start the edge router
pub async fn serve_edge(
    host: &str,
    port: u16,
    state: Arc<EdgeState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    info!(
        "Starting edge router on {}:{} (artifacts at {})",
        host, port, state.artifact_base_url
    );
    spawn_server(host, port, edge_router(state), shutdown_signal).await
}

async fn spawn_server(
    host: &str,
    port: u16,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::ServerError(format!("Failed to bind {addr}: {e}")))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::ServerError(e.to_string()))
    });

    Ok(handle)
}
