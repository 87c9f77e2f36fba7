//! Job runner seam
//!
//! A job runner accepts "run this build with these parameters" and later
//! reports a terminal exit code. The orchestrator never looks inside a job.

pub mod in_process;
pub mod process;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::deploy::git::RepoSource;
use crate::errors::DeployError;

pub use in_process::{InProcessJobRunner, PlanTemplate};
pub use process::ProcessJobRunner;

/// Parameters of one build job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub project_id: String,
    pub deployment_id: String,
    pub repository: RepoSource,
}

/// Terminal result reported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub exit_code: i32,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Handle to a launched job
#[derive(Debug)]
pub struct JobExecution {
    handle: JoinHandle<Result<JobOutcome, DeployError>>,
}

impl JobExecution {
    pub fn new(handle: JoinHandle<Result<JobOutcome, DeployError>>) -> Self {
        Self { handle }
    }

    /// Wait for the job to terminate
    pub async fn wait(self) -> Result<JobOutcome, DeployError> {
        self.handle
            .await
            .map_err(|e| DeployError::JobError(format!("Job task failed: {e}")))?
    }
}

/// Launches build jobs
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Start a job. An error means the job was never started.
    async fn launch(&self, spec: JobSpec) -> Result<JobExecution, DeployError>;
}
