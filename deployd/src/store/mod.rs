//! Project, deployment and log records

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::models::{Deployment, LogEntry, NewProject, Project};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Record store used by the orchestrator, the registry and the edge router
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a project. Fails with `Conflict` if the subdomain is taken.
    async fn insert_project(&self, project: NewProject) -> Result<Project, DeployError>;

    async fn find_project(&self, id: &str) -> Result<Option<Project>, DeployError>;

    async fn find_project_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Project>, DeployError>;

    async fn subdomain_exists(&self, subdomain: &str) -> Result<bool, DeployError>;

    /// Record the artifact tree served for a project
    async fn set_artifact_root(&self, project_id: &str, root: &str) -> Result<(), DeployError>;

    /// Create a deployment in `PENDING`
    async fn create_deployment(&self, project_id: &str) -> Result<Deployment, DeployError>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, DeployError>;

    /// Deployments of a project, newest first
    async fn list_deployments(&self, project_id: &str) -> Result<Vec<Deployment>, DeployError>;

    /// Move a deployment to `status`.
    ///
    /// Applied atomically only when the current status is a legal predecessor
    /// of `status`; otherwise fails with `InvalidTransition`.
    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, DeployError>;

    /// Append log lines in order. Returns the number of entries written.
    async fn append_logs(
        &self,
        project_id: &str,
        deployment_id: Option<&str>,
        lines: &[String],
    ) -> Result<usize, DeployError>;

    /// Log entries of a project, in insertion order
    async fn list_logs(&self, project_id: &str) -> Result<Vec<LogEntry>, DeployError>;
}

/// Timestamps for a batch of `count` log lines, strictly increasing from `base`
/// so that ordering by creation time preserves line order
pub(crate) fn line_timestamps(base: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    (0..count)
        .map(|i| base + Duration::microseconds(i as i64))
        .collect()
}
