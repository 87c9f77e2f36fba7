//! Build executor
//!
//! Runs inside one job invocation: checks out the source, runs the install and
//! build commands, and uploads the output tree. Every step is published on the
//! project's log channel as it happens, before the overall result is known.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::artifacts::{content_type_for, object_key, ArtifactStore};
use crate::bus::{BuildEvent, Channels, EventBus};
use crate::deploy::git::{self, RepoSource};
use crate::deploy::outcome::{BuildFailure, BuildOutcome};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// What to build and where
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub project_id: String,

    /// Repository to check out; `None` when the source is already in place
    pub repository: Option<RepoSource>,

    /// Checkout directory; the build command runs here
    pub source_dir: PathBuf,

    pub install_command: String,

    pub build_command: String,

    /// Build output directory, relative to `source_dir`
    pub output_dir: PathBuf,
}

impl BuildPlan {
    /// Shell script run in `source_dir`
    pub fn script(&self) -> String {
        let install = self.install_command.trim();
        let build = self.build_command.trim();
        match (install.is_empty(), build.is_empty()) {
            (true, _) => build.to_string(),
            (false, true) => install.to_string(),
            (false, false) => format!("{install} && {build}"),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.source_dir.join(&self.output_dir)
    }
}

/// Publishes progress for one project and mirrors it into the local log
#[derive(Clone)]
struct Progress {
    bus: Arc<dyn EventBus>,
    channel: String,
    project_id: String,
}

impl Progress {
    async fn emit(&self, line: impl Into<String>) {
        let event = BuildEvent::new(line);
        info!(project_id = %self.project_id, "{}", event.log);
        if let Err(e) = self.bus.publish(&self.channel, &event).await {
            debug!("Build event not published: {}", e);
        }
    }
}

/// Build executor
pub struct BuildExecutor {
    bus: Arc<dyn EventBus>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl BuildExecutor {
    pub fn new(bus: Arc<dyn EventBus>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { bus, artifacts }
    }

    /// Run the whole pipeline. Never fails; problems are recorded in the outcome.
    pub async fn run(&self, plan: &BuildPlan) -> BuildOutcome {
        let progress = Progress {
            bus: self.bus.clone(),
            channel: Channels::build_logs(&plan.project_id),
            project_id: plan.project_id.clone(),
        };
        let mut outcome = BuildOutcome::default();

        progress.emit("Build started...").await;

        if let Some(repo) = &plan.repository {
            progress
                .emit(format!("Cloning {} ({})", repo.url, repo.branch))
                .await;
            if let Err(e) = git::sync_repository(repo, &plan.source_dir).await {
                progress.emit(format!("error: {e}")).await;
                outcome.record(BuildFailure::Checkout {
                    message: e.to_string(),
                });
                progress.emit("Done with errors").await;
                return outcome;
            }
        }

        // The checkout is reused between builds; only this build's output may be uploaded
        let output = Dir::new(plan.output_path());
        if let Err(e) = output.delete().await {
            progress
                .emit(format!("error: could not clear previous build output: {e}"))
                .await;
            outcome.record(BuildFailure::StaleOutput {
                path: output.path().display().to_string(),
                message: e.to_string(),
            });
            progress.emit("Done with errors").await;
            return outcome;
        }

        if !self.run_build_command(plan, &progress, &mut outcome).await {
            progress.emit("Done with errors").await;
            return outcome;
        }
        progress.emit("Build Complete").await;

        self.upload_outputs(plan, &progress, &mut outcome).await;

        if outcome.succeeded() {
            progress.emit("Done").await;
        } else {
            progress.emit("Done with errors").await;
        }
        outcome
    }

    /// Returns `false` when the command could not be started at all
    async fn run_build_command(
        &self,
        plan: &BuildPlan,
        progress: &Progress,
        outcome: &mut BuildOutcome,
    ) -> bool {
        let script = plan.script();
        progress.emit(format!("Running: {script}")).await;

        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .current_dir(&plan.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                progress.emit(format!("error: failed to start build: {e}")).await;
                outcome.record(BuildFailure::Spawn {
                    message: e.to_string(),
                });
                return false;
            }
        };

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(forward_lines(stdout, progress.clone(), "")));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_lines(stderr, progress.clone(), "error: ")));

        let status = child.wait().await;

        if let Some(task) = stdout_task {
            if let Err(e) = task.await {
                warn!("stdout reader failed: {}", e);
            }
        }
        let diagnostic_lines = match stderr_task {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!("stderr reader failed: {}", e);
                0
            }),
            None => 0,
        };

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                progress.emit(format!("error: build exited with {status}")).await;
                outcome.record(BuildFailure::ExitStatus {
                    code: status.code(),
                });
            }
            Err(e) => {
                progress.emit(format!("error: failed to wait for build: {e}")).await;
                outcome.record(BuildFailure::ExitStatus { code: None });
            }
        }

        if diagnostic_lines > 0 {
            outcome.record(BuildFailure::Diagnostics {
                lines: diagnostic_lines,
            });
        }

        true
    }

    async fn upload_outputs(&self, plan: &BuildPlan, progress: &Progress, outcome: &mut BuildOutcome) {
        let output = Dir::new(plan.output_path());
        let output_display = output.path().display().to_string();

        let files = match output.walk_files().await {
            Ok(files) => files,
            Err(e) => {
                progress
                    .emit(format!("error: no build output at {output_display}: {e}"))
                    .await;
                outcome.record(BuildFailure::OutputMissing {
                    path: output_display,
                });
                return;
            }
        };

        progress.emit("Starting to upload").await;

        for relative in files {
            let relative_str = slash_path(&relative);
            let key = object_key(&plan.project_id, &relative_str);
            progress.emit(format!("uploading {relative_str}")).await;

            match self.upload_one(&output, &relative, &key).await {
                Ok(()) => {
                    progress.emit(format!("uploaded {relative_str}")).await;
                    outcome.record_upload(key);
                }
                Err(e) => {
                    progress
                        .emit(format!("error uploading {relative_str}: {e}"))
                        .await;
                    outcome.record(BuildFailure::Upload {
                        key,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn upload_one(&self, output: &Dir, relative: &Path, key: &str) -> Result<(), DeployError> {
        let data = output.file_at(relative).read_bytes().await?;
        self.artifacts
            .put(key, Bytes::from(data), &content_type_for(relative))
            .await
    }
}

/// Forward each line of `reader` as a build event, returning how many
/// lines were seen
async fn forward_lines<R>(reader: R, progress: Progress, prefix: &'static str) -> usize
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut count = 0;

    loop {
        match segments.next_segment().await {
            Ok(Some(segment)) => {
                let text = String::from_utf8_lossy(&segment);
                let line = text.trim_end_matches('\r');
                count += 1;
                progress.emit(format!("{prefix}{line}")).await;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read build output: {}", e);
                break;
            }
        }
    }

    count
}

/// `/`-separated form of a relative path
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
