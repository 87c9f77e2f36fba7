//! Server state

use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::store::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn store(&self) -> &dyn DeploymentStore {
        self.orchestrator.store().as_ref()
    }
}
