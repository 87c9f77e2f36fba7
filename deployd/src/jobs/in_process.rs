//! Runs the build executor as a task inside the orchestrator process

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::deploy::executor::{BuildExecutor, BuildPlan};
use crate::errors::DeployError;
use crate::jobs::{JobExecution, JobOutcome, JobRunner, JobSpec};
use crate::storage::settings::BuilderSettings;

/// How a [`JobSpec`] becomes a [`BuildPlan`]
#[derive(Debug, Clone)]
pub struct PlanTemplate {
    /// Parent of per-project source directories
    pub work_root: PathBuf,
    pub install_command: String,
    pub build_command: String,
    pub output_dir: PathBuf,
    /// Clone or pull the repository before building
    pub checkout: bool,
}

impl PlanTemplate {
    pub fn from_settings(settings: &BuilderSettings, work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            install_command: settings.install_command.clone(),
            build_command: settings.build_command.clone(),
            output_dir: PathBuf::from(&settings.output_dir),
            checkout: true,
        }
    }

    pub fn plan(&self, spec: &JobSpec) -> BuildPlan {
        BuildPlan {
            project_id: spec.project_id.clone(),
            repository: self.checkout.then(|| spec.repository.clone()),
            source_dir: self.work_root.join(&spec.project_id),
            install_command: self.install_command.clone(),
            build_command: self.build_command.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

pub struct InProcessJobRunner {
    executor: Arc<BuildExecutor>,
    template: PlanTemplate,
}

impl InProcessJobRunner {
    pub fn new(executor: Arc<BuildExecutor>, template: PlanTemplate) -> Self {
        Self { executor, template }
    }
}

#[async_trait]
impl JobRunner for InProcessJobRunner {
    async fn launch(&self, spec: JobSpec) -> Result<JobExecution, DeployError> {
        let plan = self.template.plan(&spec);
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move {
            let outcome = executor.run(&plan).await;
            Ok(JobOutcome {
                exit_code: outcome.exit_code(),
            })
        });
        Ok(JobExecution::new(handle))
    }
}
