//! Project models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deployable unit linked to a source repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    pub name: String,

    pub repo_url: String,

    pub branch: String,

    /// Routing key; assigned at registration and never changed
    pub subdomain: String,

    /// Identifier of the artifact tree served for this project, set on the
    /// first successful deployment
    pub artifact_root: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Identifier under which the Edge Router finds this project's files
    pub fn artifact_key(&self) -> &str {
        self.artifact_root.as_deref().unwrap_or(&self.id)
    }
}

/// Fields required to insert a project
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    pub subdomain: String,
}
