//! Git source checkout

use std::path::Path;
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;

/// Source repository coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSource {
    pub url: String,
    pub branch: String,
}

/// Clone `repo` into `target_dir`, or fetch the branch tip and hard-reset an
/// existing checkout to it
pub async fn sync_repository(repo: &RepoSource, target_dir: &Path) -> Result<(), DeployError> {
    info!(
        "Syncing Git repository: {} (branch: {}) to {}",
        repo.url,
        repo.branch,
        target_dir.display()
    );

    if target_dir.join(".git").exists() {
        debug!("Checkout exists, fetching {}...", repo.branch);
        let output = Command::new("git")
            .current_dir(target_dir)
            .args(["fetch", "--depth", "1", "origin", &repo.branch])
            .output()
            .await
            .map_err(|e| DeployError::BuildError(format!("Failed to run git fetch: {}", e)))?;
        check_output("git fetch", &output)?;

        // Discards local edits and follows force-pushes
        let output = Command::new("git")
            .current_dir(target_dir)
            .args(["reset", "--hard", "FETCH_HEAD"])
            .output()
            .await
            .map_err(|e| DeployError::BuildError(format!("Failed to run git reset: {}", e)))?;
        check_output("git reset", &output)?;
    } else {
        debug!("Cloning repository to {}...", target_dir.display());
        if let Some(parent) = target_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output = Command::new("git")
            .args(["clone", "--depth", "1", "-b", &repo.branch, &repo.url])
            .arg(target_dir)
            .output()
            .await
            .map_err(|e| DeployError::BuildError(format!("Failed to run git clone: {}", e)))?;
        check_output("git clone", &output)?;
    }

    info!("Successfully synced Git repository");
    Ok(())
}

fn check_output(step: &str, output: &Output) -> Result<(), DeployError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(DeployError::BuildError(format!(
        "{} failed ({}): {}",
        step,
        output.status,
        stderr.trim()
    )))
}
