//! One-shot build job entry (`--build`)

use std::sync::Arc;

use tracing::{error, info};

use crate::artifacts::open_store;
use crate::bus::{BusAddress, EventBus, MemoryEventBus, MqttEventBus};
use crate::deploy::env::BuildEnv;
use crate::deploy::executor::BuildExecutor;
use crate::deploy::outcome::BuildOutcome;
use crate::errors::DeployError;

/// Run one build described by `env` and release the bus connection.
///
/// Fails only if the job could not be set up; build problems are reported in
/// the returned outcome.
pub async fn run_build_job(env: BuildEnv) -> Result<BuildOutcome, DeployError> {
    let bus: Arc<dyn EventBus> = match &env.event_bus_url {
        Some(url) => {
            let address = BusAddress::parse(url)?;
            let client_id = format!("cloudeploy-build-{}", env.project_id);
            Arc::new(MqttEventBus::connect(&address, &client_id, 64)?)
        }
        None => {
            info!("No event bus configured, build events are only logged");
            Arc::new(MemoryEventBus::default())
        }
    };

    let default_local_dir = env.work_dir.join(".artifacts");
    let artifacts = open_store(&env.artifacts, &default_local_dir)?;
    let executor = BuildExecutor::new(bus.clone(), artifacts);

    let outcome = executor.run(&env.plan()).await;
    for failure in &outcome.failures {
        error!("{}", failure);
    }

    if let Err(e) = bus.close().await {
        error!("Failed to flush build events: {}", e);
    }
    Ok(outcome)
}
