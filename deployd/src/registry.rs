//! Project registration
//!
//! Validates user input and assigns each new project a unique, DNS-safe
//! subdomain derived from its name. The subdomain is the routing key used by
//! the edge router and never changes after registration.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::{NewProject, Project};
use crate::store::DeploymentStore;

static HTTPS_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https://[\w.-]+/[\w.-]+/[\w.-]+(\.git)?(/?|#.*)?$").unwrap()
});

static SSH_REPO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^git@[\w.-]+:[\w.-]+/[\w.-]+(\.git)?$").unwrap());

static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._\-/]+$").unwrap());

pub const DEFAULT_BRANCH: &str = "main";
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_BRANCH_LEN: usize = 64;
pub const MAX_SUBDOMAIN_LEN: usize = 63;
const MAX_SUBDOMAIN_ATTEMPTS: usize = 1000;

/// Registration request
#[derive(Debug, Clone)]
pub struct RegisterProject {
    pub name: String,
    pub repo_url: String,
    pub branch: Option<String>,
}

/// Validate `request` and insert the project with a freshly allocated subdomain
pub async fn register_project(
    store: &dyn DeploymentStore,
    request: RegisterProject,
) -> Result<Project, DeployError> {
    let name = validate_name(&request.name)?;
    let repo_url = validate_repo_url(&request.repo_url)?;
    let branch = validate_branch(request.branch.as_deref())?;
    let base = slugify(&name);

    for attempt in 0..MAX_SUBDOMAIN_ATTEMPTS {
        let candidate = subdomain_candidate(&base, attempt);
        if store.subdomain_exists(&candidate).await? {
            continue;
        }

        let new_project = NewProject {
            name: name.clone(),
            repo_url: repo_url.clone(),
            branch: branch.clone(),
            subdomain: candidate.clone(),
        };
        match store.insert_project(new_project).await {
            Ok(project) => {
                info!(
                    "Registered project {} ({}) at subdomain {}",
                    project.name, project.id, project.subdomain
                );
                return Ok(project);
            }
            // Taken between the check and the insert
            Err(DeployError::Conflict(_)) => {
                debug!("Subdomain {} was claimed concurrently", candidate);
            }
            Err(e) => return Err(e),
        }
    }

    Err(DeployError::Conflict(format!(
        "Failed to allocate a unique subdomain for {base}"
    )))
}

pub fn validate_name(name: &str) -> Result<String, DeployError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DeployError::ValidationError(
            "Project name is required".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DeployError::ValidationError(format!(
            "Project name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Accept HTTPS (`https://host/owner/repo`) or SSH (`git@host:owner/repo`) URLs
pub fn validate_repo_url(url: &str) -> Result<String, DeployError> {
    let trimmed = url.trim();
    if HTTPS_REPO_RE.is_match(trimmed) || SSH_REPO_RE.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(DeployError::ValidationError(
            "Invalid repository URL. Use HTTPS (https://...) or SSH (git@...) Git URL.".to_string(),
        ))
    }
}

pub fn validate_branch(branch: Option<&str>) -> Result<String, DeployError> {
    let branch = branch.map(str::trim).unwrap_or(DEFAULT_BRANCH);
    if branch.is_empty() {
        return Ok(DEFAULT_BRANCH.to_string());
    }
    if branch.len() > MAX_BRANCH_LEN || !BRANCH_RE.is_match(branch) {
        return Err(DeployError::ValidationError(format!(
            "Invalid branch name: {branch}"
        )));
    }
    Ok(branch.to_string())
}

/// DNS-safe label derived from a project name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug.truncate(MAX_SUBDOMAIN_LEN);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}

/// `base`, `base-2`, `base-3`, ...
fn subdomain_candidate(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt + 1)
    }
}
