//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;

/// One build attempt for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,

    pub project_id: String,

    pub status: DeploymentStatus,

    pub created_at: DateTime<Utc>,
}

/// One persisted line of build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,

    pub project_id: String,

    /// Set when the line was captured while driving a deployment
    pub deployment_id: Option<String>,

    pub message: String,

    pub created_at: DateTime<Utc>,
}
