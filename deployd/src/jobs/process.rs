//! Runs each build as a child process of this binary (`--build` mode)

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use crate::deploy::env::project_vars;
use crate::errors::DeployError;
use crate::jobs::{JobExecution, JobOutcome, JobRunner, JobSpec};

/// Exit code reported when the child was killed by a signal
const SIGNALED_EXIT_CODE: i32 = -1;

pub struct ProcessJobRunner {
    executable: PathBuf,
    shared_env: Vec<(String, String)>,
    work_root: PathBuf,
}

impl ProcessJobRunner {
    /// `shared_env` is passed to every job; `work_root` holds one checkout
    /// directory per project
    pub fn new(
        executable: impl Into<PathBuf>,
        shared_env: Vec<(String, String)>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            shared_env,
            work_root: work_root.into(),
        }
    }

    fn command(&self, spec: &JobSpec) -> Command {
        let work_dir = self.work_root.join(&spec.project_id);
        let mut command = Command::new(&self.executable);
        command
            .arg("--build")
            .envs(self.shared_env.iter().map(|(k, v)| (k, v)))
            .envs(project_vars(&spec.project_id, &spec.repository, &work_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn launch(&self, spec: JobSpec) -> Result<JobExecution, DeployError> {
        let mut child = self.command(&spec).spawn().map_err(|e| {
            DeployError::JobError(format!(
                "Failed to start {}: {}",
                self.executable.display(),
                e
            ))
        })?;

        info!(
            "Launched build job for deployment {} (pid {:?})",
            spec.deployment_id,
            child.id()
        );

        let deployment_id = spec.deployment_id;
        let handle = tokio::spawn(async move {
            let status = child.wait().await.map_err(|e| {
                error!("Failed to wait for build job {}: {}", deployment_id, e);
                DeployError::JobError(e.to_string())
            })?;
            let exit_code = status.code().unwrap_or(SIGNALED_EXIT_CODE);
            info!("Build job {} exited with {}", deployment_id, exit_code);
            Ok(JobOutcome { exit_code })
        });

        Ok(JobExecution::new(handle))
    }
}
