//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use openapi_server::models::{
    AppendLogsRequest, AppendLogsResponse, HealthResponse, RegisterProjectRequest,
    UpdateDeploymentStatusRequest, VersionResponse,
};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::models::Project;
use crate::registry::{register_project, RegisterProject};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "cloudeploy".to_string(),
        version: version.version,
        active_deployments: state.orchestrator.active_deployments(),
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Register a project
pub async fn register_project_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RegisterProjectRequest>,
) -> Result<impl IntoResponse, DeployError> {
    let project = register_project(
        state.store(),
        RegisterProject {
            name: request.name,
            repo_url: request.repo_url,
            branch: request.branch,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, DeployError> {
    let project = find_project(&state, &project_id).await?;
    Ok(Json(project))
}

/// Start a deployment; the build continues after the response is sent
pub async fn start_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, DeployError> {
    let handle = state.orchestrator.start_deployment(&project_id).await?;
    Ok((StatusCode::ACCEPTED, Json(handle.deployment)))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, DeployError> {
    find_project(&state, &project_id).await?;
    let deployments = state.store().list_deployments(&project_id).await?;
    Ok(Json(deployments))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, DeployError> {
    let deployment = state
        .store()
        .get_deployment(&deployment_id)
        .await?
        .ok_or_else(|| DeployError::NotFound(format!("Deployment {deployment_id}")))?;
    Ok(Json(deployment))
}

pub async fn update_deployment_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
    Json(request): Json<UpdateDeploymentStatusRequest>,
) -> Result<impl IntoResponse, DeployError> {
    let status: DeploymentStatus = request
        .status
        .parse()
        .map_err(DeployError::ValidationError)?;
    let deployment = state
        .orchestrator
        .update_deployment_status(&deployment_id, status)
        .await?;
    Ok(Json(deployment))
}

pub async fn append_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(request): Json<AppendLogsRequest>,
) -> Result<impl IntoResponse, DeployError> {
    let written = state
        .orchestrator
        .append_logs(&project_id, &request.lines)
        .await?;
    Ok((StatusCode::CREATED, Json(AppendLogsResponse { written })))
}

pub async fn list_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, DeployError> {
    find_project(&state, &project_id).await?;
    let logs = state.store().list_logs(&project_id).await?;
    Ok(Json(logs))
}

async fn find_project(state: &ServerState, project_id: &str) -> Result<Project, DeployError> {
    state
        .store()
        .find_project(project_id)
        .await?
        .ok_or_else(|| DeployError::NotFound(format!("Project {project_id}")))
}
