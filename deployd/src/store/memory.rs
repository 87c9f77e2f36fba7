//! In-memory record store

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::models::{Deployment, LogEntry, NewProject, Project};
use crate::store::{line_timestamps, DeploymentStore};
use crate::utils::generate_uuid;

#[derive(Debug, Default)]
struct Records {
    projects: Vec<Project>,
    deployments: Vec<Deployment>,
    logs: Vec<LogEntry>,
}

/// Store holding every record in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert_project(&self, project: NewProject) -> Result<Project, DeployError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records
            .projects
            .iter()
            .any(|p| p.subdomain == project.subdomain)
        {
            return Err(DeployError::Conflict(format!(
                "Subdomain {} is already taken",
                project.subdomain
            )));
        }

        let created = Project {
            id: generate_uuid(),
            name: project.name,
            repo_url: project.repo_url,
            branch: project.branch,
            subdomain: project.subdomain,
            artifact_root: None,
            created_at: Utc::now(),
        };
        records.projects.push(created.clone());
        Ok(created)
    }

    async fn find_project(&self, id: &str) -> Result<Option<Project>, DeployError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn find_project_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Project>, DeployError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .projects
            .iter()
            .find(|p| p.subdomain == subdomain)
            .cloned())
    }

    async fn subdomain_exists(&self, subdomain: &str) -> Result<bool, DeployError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.projects.iter().any(|p| p.subdomain == subdomain))
    }

    async fn set_artifact_root(&self, project_id: &str, root: &str) -> Result<(), DeployError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let project = records
            .projects
            .iter_mut()
            .find(|p| p.id == project_id)
            .ok_or_else(|| DeployError::NotFound(format!("Project {project_id}")))?;
        project.artifact_root = Some(root.to_string());
        Ok(())
    }

    async fn create_deployment(&self, project_id: &str) -> Result<Deployment, DeployError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if !records.projects.iter().any(|p| p.id == project_id) {
            return Err(DeployError::NotFound(format!("Project {project_id}")));
        }

        let deployment = Deployment {
            id: generate_uuid(),
            project_id: project_id.to_string(),
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
        };
        records.deployments.push(deployment.clone());
        Ok(deployment)
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.deployments.iter().find(|d| d.id == id).cloned())
    }

    async fn list_deployments(&self, project_id: &str) -> Result<Vec<Deployment>, DeployError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .deployments
            .iter()
            .rev()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, DeployError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let deployment = records
            .deployments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DeployError::NotFound(format!("Deployment {id}")))?;

        if !deployment.status.can_transition_to(status) {
            return Err(DeployError::InvalidTransition {
                from: deployment.status,
                to: status,
            });
        }
        deployment.status = status;
        Ok(deployment.clone())
    }

    async fn append_logs(
        &self,
        project_id: &str,
        deployment_id: Option<&str>,
        lines: &[String],
    ) -> Result<usize, DeployError> {
        let stamps = line_timestamps(Utc::now(), lines.len());
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        for (line, created_at) in lines.iter().zip(stamps) {
            records.logs.push(LogEntry {
                id: generate_uuid(),
                project_id: project_id.to_string(),
                deployment_id: deployment_id.map(str::to_string),
                message: line.clone(),
                created_at,
            });
        }
        Ok(lines.len())
    }

    async fn list_logs(&self, project_id: &str) -> Result<Vec<LogEntry>, DeployError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .logs
            .iter()
            .filter(|l| l.project_id == project_id)
            .cloned()
            .collect())
    }
}
