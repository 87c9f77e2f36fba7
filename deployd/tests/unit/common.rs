//! Shared test fixtures

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudeploy::bus::{BuildEvent, Channels, EventBus, Subscription};
use cloudeploy::errors::DeployError;
use cloudeploy::jobs::{JobExecution, JobOutcome, JobRunner, JobSpec};
use cloudeploy::models::{NewProject, Project};
use cloudeploy::store::DeploymentStore;
use tokio::sync::Notify;

pub async fn insert_project(store: &dyn DeploymentStore, subdomain: &str) -> Project {
    store
        .insert_project(NewProject {
            name: subdomain.to_string(),
            repo_url: format!("https://github.com/acme/{subdomain}.git"),
            branch: "main".to_string(),
            subdomain: subdomain.to_string(),
        })
        .await
        .unwrap()
}

/// Read events until none arrives for 100ms
pub async fn drain(subscription: &mut Subscription) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), subscription.next()).await
    {
        lines.push(event.log);
    }
    lines
}

/// Job runner that publishes fixed lines and exits with a fixed code
pub struct ScriptedRunner {
    pub bus: Arc<dyn EventBus>,
    pub lines: Vec<String>,
    pub exit_code: i32,
    /// When set, each job waits for one notification before exiting
    pub gate: Option<Arc<Notify>>,
    pub launches: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(bus: Arc<dyn EventBus>, lines: &[&str], exit_code: i32) -> Self {
        Self {
            bus,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit_code,
            gate: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn launch(&self, spec: JobSpec) -> Result<JobExecution, DeployError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let bus = self.bus.clone();
        let lines = self.lines.clone();
        let exit_code = self.exit_code;
        let gate = self.gate.clone();

        let handle = tokio::spawn(async move {
            let channel = Channels::build_logs(&spec.project_id);
            for line in lines {
                bus.publish(&channel, &BuildEvent::new(line)).await?;
            }
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(JobOutcome { exit_code })
        });
        Ok(JobExecution::new(handle))
    }
}

/// Job runner whose every launch is rejected
pub struct RejectingRunner;

#[async_trait]
impl JobRunner for RejectingRunner {
    async fn launch(&self, _spec: JobSpec) -> Result<JobExecution, DeployError> {
        Err(DeployError::JobError("quota exceeded".to_string()))
    }
}

/// Job runner that publishes one line and then panics during launch
pub struct PanickingRunner {
    pub bus: Arc<dyn EventBus>,
}

#[async_trait]
impl JobRunner for PanickingRunner {
    async fn launch(&self, spec: JobSpec) -> Result<JobExecution, DeployError> {
        self.bus
            .publish(
                &Channels::build_logs(&spec.project_id),
                &BuildEvent::new("about to fail"),
            )
            .await?;
        panic!("runner exploded");
    }
}
