//! Finite state machine for deployment status

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentStatus {
    /// Record created, job not yet acknowledged by the runner
    Pending,

    /// Job accepted by the runner and executing
    Building,

    /// Job exited cleanly and every artifact uploaded
    Success,

    /// Launch rejected, build failed or an upload failed
    Failed,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 4] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Building,
        DeploymentStatus::Success,
        DeploymentStatus::Failed,
    ];

    /// Whether no transition may leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    /// Whether `next` is reachable from `self` in a single step
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        matches!(
            (self, next),
            (DeploymentStatus::Pending, DeploymentStatus::Building)
                | (DeploymentStatus::Pending, DeploymentStatus::Failed)
                | (DeploymentStatus::Building, DeploymentStatus::Success)
                | (DeploymentStatus::Building, DeploymentStatus::Failed)
        )
    }

    /// Statuses from which `self` may be entered
    pub fn predecessors(&self) -> Vec<DeploymentStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DeploymentStatus::Pending),
            "BUILDING" => Ok(DeploymentStatus::Building),
            "SUCCESS" => Ok(DeploymentStatus::Success),
            "FAILED" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Deployment lifecycle event
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// Job runner acknowledged the launch
    Launched,

    /// Job reported success
    Succeeded,

    /// Launch rejected or job reported failure
    Failed(String),
}

/// Deployment status FSM
#[derive(Debug, Clone)]
pub struct StatusFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl StatusFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            status: DeploymentStatus::Pending,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Get failure reason if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: StatusEvent) -> Result<DeploymentStatus, String> {
        let new_status = match (self.status, &event) {
            (DeploymentStatus::Pending, StatusEvent::Launched) => DeploymentStatus::Building,
            (DeploymentStatus::Building, StatusEvent::Succeeded) => DeploymentStatus::Success,
            (DeploymentStatus::Pending | DeploymentStatus::Building, StatusEvent::Failed(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }
            (status, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", status, event));
            }
        };

        self.status = new_status;
        Ok(new_status)
    }
}

impl Default for StatusFsm {
    fn default() -> Self {
        Self::new()
    }
}
