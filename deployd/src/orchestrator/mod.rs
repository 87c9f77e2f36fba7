//! Deployment orchestrator
//!
//! `start_deployment` records a `PENDING` deployment and returns it at once.
//! A background task per deployment then subscribes to the project's log
//! channel, launches the build job, walks the deployment through
//! `BUILDING` to `SUCCESS` or `FAILED`, and finally persists every log line
//! it received. That task is the only writer of its deployment's status.

pub mod collector;

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{Channels, EventBus};
use crate::deploy::fsm::{DeploymentStatus, StatusEvent, StatusFsm};
use crate::deploy::git::RepoSource;
use crate::errors::DeployError;
use crate::jobs::{JobRunner, JobSpec};
use crate::models::{Deployment, Project};
use crate::orchestrator::collector::LogCollector;
use crate::storage::settings::OrchestratorSettings;
use crate::store::DeploymentStore;

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Reject a new deployment while another of the same project is driven
    pub exclusive_builds: bool,

    /// Quiet period to keep collecting events after the job finished
    pub log_drain_grace: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            exclusive_builds: false,
            log_drain_grace: Duration::from_millis(250),
        }
    }
}

impl From<&OrchestratorSettings> for OrchestratorOptions {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            exclusive_builds: settings.exclusive_builds,
            log_drain_grace: Duration::from_millis(settings.log_drain_grace_ms),
        }
    }
}

/// Returned to the caller of `start_deployment` before the build runs
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentHandle {
    pub deployment: Deployment,
}

type ActiveProjects = Arc<Mutex<HashSet<String>>>;

/// Marks a project as being driven; released on drop
struct ActiveGuard {
    projects: ActiveProjects,
    project_id: String,
}

impl ActiveGuard {
    fn acquire(projects: &ActiveProjects, project_id: &str) -> Option<Self> {
        let mut active = projects.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(project_id.to_string()) {
            return None;
        }
        Some(Self {
            projects: projects.clone(),
            project_id: project_id.to_string(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.project_id);
    }
}

/// Everything a drive task needs
#[derive(Clone)]
struct DriveContext {
    store: Arc<dyn DeploymentStore>,
    bus: Arc<dyn EventBus>,
    runner: Arc<dyn JobRunner>,
    log_drain_grace: Duration,
}

pub struct Orchestrator {
    ctx: DriveContext,
    exclusive_builds: bool,
    active_projects: ActiveProjects,
    tasks: Mutex<HashMap<String, JoinHandle<DeploymentStatus>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        bus: Arc<dyn EventBus>,
        runner: Arc<dyn JobRunner>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            ctx: DriveContext {
                store,
                bus,
                runner,
                log_drain_grace: options.log_drain_grace,
            },
            exclusive_builds: options.exclusive_builds,
            active_projects: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.ctx.store
    }

    /// Create a `PENDING` deployment and drive it in the background
    pub async fn start_deployment(&self, project_id: &str) -> Result<DeploymentHandle, DeployError> {
        let project = self
            .ctx
            .store
            .find_project(project_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("Project {project_id}")))?;

        let guard = if self.exclusive_builds {
            let guard = ActiveGuard::acquire(&self.active_projects, project_id).ok_or_else(|| {
                DeployError::Conflict(format!(
                    "A deployment of project {project_id} is already running"
                ))
            })?;
            Some(guard)
        } else {
            None
        };

        let deployment = self.ctx.store.create_deployment(project_id).await?;
        info!(
            "Created deployment {} for project {}",
            deployment.id, project_id
        );

        let ctx = self.ctx.clone();
        let driven = deployment.clone();
        let handle = tokio::spawn(async move {
            let status = drive(ctx, project, driven).await;
            drop(guard);
            status
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(deployment.id.clone(), handle);

        Ok(DeploymentHandle { deployment })
    }

    /// Wait until the deployment is no longer being driven and return its record
    pub async fn wait_for(&self, deployment_id: &str) -> Result<Deployment, DeployError> {
        let task = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.remove(deployment_id)
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Deployment task {} failed: {}", deployment_id, e);
            }
        }

        self.ctx
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("Deployment {deployment_id}")))
    }

    /// Number of deployments currently being driven
    pub fn active_deployments(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.values().filter(|task| !task.is_finished()).count()
    }

    /// Move a deployment to `status` on behalf of an external caller
    pub async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, DeployError> {
        let deployment = self
            .ctx
            .store
            .update_deployment_status(deployment_id, status)
            .await?;
        if status == DeploymentStatus::Success {
            record_artifact_root(self.ctx.store.as_ref(), &deployment.project_id).await;
        }
        Ok(deployment)
    }

    /// Persist log lines attributed to a project
    pub async fn append_logs(&self, project_id: &str, lines: &[String]) -> Result<usize, DeployError> {
        if self.ctx.store.find_project(project_id).await?.is_none() {
            return Err(DeployError::NotFound(format!("Project {project_id}")));
        }
        self.ctx.store.append_logs(project_id, None, lines).await
    }

    /// Wait for every in-flight deployment task to finish
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        let tasks: Vec<(String, JoinHandle<DeploymentStatus>)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain().collect()
        };
        if !tasks.is_empty() {
            info!("Waiting for {} deployment task(s)...", tasks.len());
        }
        for (deployment_id, task) in tasks {
            match task.await {
                Ok(status) => debug!("Deployment {} ended {}", deployment_id, status),
                Err(e) => error!("Deployment task {} failed: {}", deployment_id, e),
            }
        }
        Ok(())
    }
}

async fn drive(ctx: DriveContext, project: Project, deployment: Deployment) -> DeploymentStatus {
    let channel = Channels::build_logs(&project.id);
    let collector = match ctx.bus.subscribe(&channel).await {
        Ok(subscription) => Some(LogCollector::start(subscription, ctx.log_drain_grace)),
        Err(e) => {
            warn!("Could not subscribe to {}, logs will not be captured: {}", channel, e);
            None
        }
    };

    let mut fsm = StatusFsm::new();
    let advanced = AssertUnwindSafe(advance(&ctx, &project, &deployment, &mut fsm))
        .catch_unwind()
        .await;
    let status = match advanced {
        Ok(status) => status,
        Err(_) => {
            error!("Deployment {} panicked while being driven", deployment.id);
            apply(&ctx, &deployment.id, &mut fsm, StatusEvent::Failed("panicked".to_string())).await
        }
    };

    if let Some(collector) = collector {
        let lines = collector.finish().await;
        match ctx
            .store
            .append_logs(&project.id, Some(&deployment.id), &lines)
            .await
        {
            Ok(written) => debug!("Persisted {} log lines for {}", written, deployment.id),
            Err(e) => error!("Failed to persist logs for {}: {}", deployment.id, e),
        }
    }

    info!("Deployment {} finished {}", deployment.id, status);
    status
}

/// Drive the job to completion, returning the last status recorded in the store
async fn advance(
    ctx: &DriveContext,
    project: &Project,
    deployment: &Deployment,
    fsm: &mut StatusFsm,
) -> DeploymentStatus {
    let spec = JobSpec {
        project_id: project.id.clone(),
        deployment_id: deployment.id.clone(),
        repository: RepoSource {
            url: project.repo_url.clone(),
            branch: project.branch.clone(),
        },
    };

    let execution = match ctx.runner.launch(spec).await {
        Ok(execution) => execution,
        Err(e) => {
            error!("Failed to launch build for {}: {}", deployment.id, e);
            return apply(ctx, &deployment.id, fsm, StatusEvent::Failed(e.to_string())).await;
        }
    };
    apply(ctx, &deployment.id, fsm, StatusEvent::Launched).await;

    match execution.wait().await {
        Ok(outcome) if outcome.succeeded() => {
            let status = apply(ctx, &deployment.id, fsm, StatusEvent::Succeeded).await;
            if status == DeploymentStatus::Success {
                record_artifact_root(ctx.store.as_ref(), &project.id).await;
            }
            status
        }
        Ok(outcome) => {
            let reason = format!("build exited with {}", outcome.exit_code);
            apply(ctx, &deployment.id, fsm, StatusEvent::Failed(reason)).await
        }
        Err(e) => apply(ctx, &deployment.id, fsm, StatusEvent::Failed(e.to_string())).await,
    }
}

/// Advance the local state machine and mirror the new status to the store.
///
/// Returns the status the store holds afterwards. A status set externally in
/// the meantime wins over the local transition.
async fn apply(
    ctx: &DriveContext,
    deployment_id: &str,
    fsm: &mut StatusFsm,
    event: StatusEvent,
) -> DeploymentStatus {
    let previous = fsm.status();
    let next = match fsm.process(event) {
        Ok(next) => next,
        Err(e) => {
            warn!("Deployment {}: {}", deployment_id, e);
            return previous;
        }
    };

    match ctx.store.update_deployment_status(deployment_id, next).await {
        Ok(deployment) => deployment.status,
        Err(DeployError::InvalidTransition { from, .. }) => {
            warn!(
                "Deployment {} is already {}, not recording {}",
                deployment_id, from, next
            );
            from
        }
        Err(e) => {
            error!(
                "Failed to record status {} for deployment {}: {}",
                next, deployment_id, e
            );
            previous
        }
    }
}

async fn record_artifact_root(store: &dyn DeploymentStore, project_id: &str) {
    if let Err(e) = store.set_artifact_root(project_id, project_id).await {
        error!("Failed to record artifact root for {}: {}", project_id, e);
    }
}
