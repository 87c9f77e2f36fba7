//! Build job environment
//!
//! A build job is configured entirely through environment variables. The
//! orchestrator host composes them with [`shared_vars`] and [`project_vars`];
//! the job process reads them back with [`BuildEnv::from_env`].

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::deploy::executor::BuildPlan;
use crate::deploy::git::RepoSource;
use crate::errors::DeployError;
use crate::storage::settings::{ArtifactBackend, ArtifactSettings, Settings};

pub const PROJECT_ID: &str = "PROJECT_ID";
pub const GIT_REPOSITORY_URL: &str = "GIT_REPOSITORY__URL";
pub const GIT_BRANCH: &str = "GIT_BRANCH";
pub const EVENT_BUS_URL: &str = "EVENT_BUS_URL";
pub const BUILD_WORK_DIR: &str = "BUILD_WORK_DIR";
pub const BUILD_OUTPUT_DIR: &str = "BUILD_OUTPUT_DIR";
pub const BUILD_INSTALL_COMMAND: &str = "BUILD_INSTALL_COMMAND";
pub const BUILD_COMMAND: &str = "BUILD_COMMAND";
pub const ARTIFACT_BACKEND: &str = "ARTIFACT_BACKEND";
pub const ARTIFACT_BUCKET: &str = "ARTIFACT_BUCKET";
pub const ARTIFACT_API_BASE_URL: &str = "ARTIFACT_API_BASE_URL";
pub const ARTIFACT_TOKEN: &str = "ARTIFACT_TOKEN";
pub const ARTIFACT_LOCAL_DIR: &str = "ARTIFACT_LOCAL_DIR";

const DEFAULT_BRANCH: &str = "main";

/// Configuration of one build job
#[derive(Debug)]
pub struct BuildEnv {
    pub project_id: String,

    /// Repository to check out; absent when the source is already in place
    pub repository: Option<RepoSource>,

    pub work_dir: PathBuf,

    pub output_dir: String,

    pub install_command: String,

    pub build_command: String,

    /// Broker URL; the job publishes nowhere when absent
    pub event_bus_url: Option<String>,

    pub artifacts: ArtifactSettings,
}

impl BuildEnv {
    /// Read the configuration through `get`, treating empty values as unset
    pub fn from_vars<F>(get: F) -> Result<Self, DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let project_id = read(PROJECT_ID).ok_or_else(|| {
            DeployError::ConfigError(format!("{PROJECT_ID} is not set"))
        })?;

        let repository = read(GIT_REPOSITORY_URL).map(|url| RepoSource {
            url,
            branch: read(GIT_BRANCH).unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        });

        let work_dir = read(BUILD_WORK_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("cloudeploy").join(&project_id));

        let defaults = ArtifactSettings::default();
        let backend = match read(ARTIFACT_BACKEND) {
            Some(raw) => raw
                .parse::<ArtifactBackend>()
                .map_err(DeployError::ConfigError)?,
            None => defaults.backend,
        };
        let artifacts = ArtifactSettings {
            backend,
            bucket: read(ARTIFACT_BUCKET).unwrap_or(defaults.bucket),
            api_base_url: read(ARTIFACT_API_BASE_URL).unwrap_or(defaults.api_base_url),
            token: read(ARTIFACT_TOKEN).map(SecretString::from),
            local_dir: read(ARTIFACT_LOCAL_DIR),
        };

        Ok(Self {
            project_id,
            repository,
            work_dir,
            output_dir: read(BUILD_OUTPUT_DIR).unwrap_or_else(|| "dist".to_string()),
            install_command: get(BUILD_INSTALL_COMMAND)
                .unwrap_or_else(|| "npm install".to_string()),
            build_command: read(BUILD_COMMAND).unwrap_or_else(|| "npm run build".to_string()),
            event_bus_url: read(EVENT_BUS_URL),
            artifacts,
        })
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, DeployError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn plan(&self) -> BuildPlan {
        BuildPlan {
            project_id: self.project_id.clone(),
            repository: self.repository.clone(),
            source_dir: self.work_dir.clone(),
            install_command: self.install_command.clone(),
            build_command: self.build_command.clone(),
            output_dir: PathBuf::from(&self.output_dir),
        }
    }
}

/// Variables every job launched from `settings` inherits.
///
/// `default_local_dir` stands in for an unset local artifact directory.
pub fn shared_vars(settings: &Settings, default_local_dir: &Path) -> Vec<(String, String)> {
    let mut vars = vec![
        (
            BUILD_OUTPUT_DIR.to_string(),
            settings.builder.output_dir.clone(),
        ),
        (
            BUILD_INSTALL_COMMAND.to_string(),
            settings.builder.install_command.clone(),
        ),
        (
            BUILD_COMMAND.to_string(),
            settings.builder.build_command.clone(),
        ),
    ];

    if let Some(url) = &settings.event_bus.url {
        vars.push((EVENT_BUS_URL.to_string(), url.clone()));
    }

    let artifacts = &settings.artifacts;
    match artifacts.backend {
        ArtifactBackend::Gcs => {
            vars.push((ARTIFACT_BACKEND.to_string(), "gcs".to_string()));
            vars.push((ARTIFACT_BUCKET.to_string(), artifacts.bucket.clone()));
            vars.push((
                ARTIFACT_API_BASE_URL.to_string(),
                artifacts.api_base_url.clone(),
            ));
            if let Some(token) = &artifacts.token {
                vars.push((
                    ARTIFACT_TOKEN.to_string(),
                    token.expose_secret().to_string(),
                ));
            }
        }
        ArtifactBackend::Local => {
            let dir = artifacts
                .local_dir
                .clone()
                .unwrap_or_else(|| default_local_dir.display().to_string());
            vars.push((ARTIFACT_BACKEND.to_string(), "local".to_string()));
            vars.push((ARTIFACT_LOCAL_DIR.to_string(), dir));
        }
    }

    vars
}

/// Variables identifying the project a job builds
pub fn project_vars(
    project_id: &str,
    repository: &RepoSource,
    work_dir: &Path,
) -> Vec<(String, String)> {
    vec![
        (PROJECT_ID.to_string(), project_id.to_string()),
        (GIT_REPOSITORY_URL.to_string(), repository.url.clone()),
        (GIT_BRANCH.to_string(), repository.branch.clone()),
        (BUILD_WORK_DIR.to_string(), work_dir.display().to_string()),
    ]
}
