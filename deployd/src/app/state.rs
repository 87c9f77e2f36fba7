//! Application state management

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::artifacts::open_store;
use crate::bus::{BusAddress, EventBus, MemoryEventBus, MqttEventBus};
use crate::deploy::env::shared_vars;
use crate::deploy::executor::BuildExecutor;
use crate::edge::EdgeState;
use crate::errors::DeployError;
use crate::jobs::{InProcessJobRunner, JobRunner, PlanTemplate, ProcessJobRunner};
use crate::orchestrator::Orchestrator;
use crate::storage::settings::Settings;
use crate::store::{DeploymentStore, MemoryStore, PostgresStore};
use crate::utils::generate_uuid;

/// Main application state
pub struct AppState {
    /// Record store
    pub store: Arc<dyn DeploymentStore>,

    /// Event bus shared by the orchestrator and in-process builds
    pub bus: Arc<dyn EventBus>,

    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Edge router state
    pub edge: Arc<EdgeState>,
}

impl AppState {
    /// Build the application state from settings
    pub async fn init(settings: &Settings, options: &AppOptions) -> Result<Self, DeployError> {
        let store = init_store(settings).await?;
        let bus = init_bus(settings)?;
        let runner = init_runner(settings, options, bus.clone())?;

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            bus.clone(),
            runner,
            options.orchestrator.clone(),
        ));
        let edge = Arc::new(EdgeState::new(store.clone(), &options.artifact_base_url)?);

        Ok(Self {
            store,
            bus,
            orchestrator,
            edge,
        })
    }

    /// Wait for in-flight deployments and release the bus connection
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        self.orchestrator.shutdown().await?;
        if let Err(e) = self.bus.close().await {
            error!("Failed to close event bus: {}", e);
        }
        Ok(())
    }
}

async fn init_store(settings: &Settings) -> Result<Arc<dyn DeploymentStore>, DeployError> {
    match &settings.database.url {
        Some(url) => {
            let store =
                PostgresStore::connect(url.expose_secret(), settings.database.max_connections)
                    .await?;
            if settings.database.run_migrations {
                store.migrate().await?;
            }
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured, records are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn init_bus(settings: &Settings) -> Result<Arc<dyn EventBus>, DeployError> {
    match &settings.event_bus.url {
        Some(url) => {
            let mut address = BusAddress::parse(url)?;
            if settings.event_bus.ca_cert_path.is_some() {
                address.ca_cert_path = settings.event_bus.ca_cert_path.clone();
            }
            let client_id = format!("cloudeploy-orchestrator-{}", generate_uuid());
            Ok(Arc::new(MqttEventBus::connect(
                &address,
                &client_id,
                settings.event_bus.channel_capacity,
            )?))
        }
        None => {
            info!("No event bus configured, using the in-process bus");
            Ok(Arc::new(MemoryEventBus::new(
                settings.event_bus.channel_capacity,
            )))
        }
    }
}

/// Builds run as child processes when they can reach a shared broker, and as
/// in-process tasks on the in-process bus otherwise
fn init_runner(
    settings: &Settings,
    options: &AppOptions,
    bus: Arc<dyn EventBus>,
) -> Result<Arc<dyn JobRunner>, DeployError> {
    let work_root = settings
        .builder
        .work_dir
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| options.layout.builds_dir().path().to_path_buf());
    let artifacts_dir = options.layout.artifacts_dir().path().to_path_buf();

    if settings.event_bus.url.is_some() {
        let executable = match &settings.builder.executable {
            Some(path) => std::path::PathBuf::from(path),
            None => std::env::current_exe()?,
        };
        info!("Build jobs run as {} --build", executable.display());
        return Ok(Arc::new(ProcessJobRunner::new(
            executable,
            shared_vars(settings, &artifacts_dir),
            work_root,
        )));
    }

    let artifacts = open_store(&settings.artifacts, &artifacts_dir)?;
    let executor = Arc::new(BuildExecutor::new(bus, artifacts));
    info!("Build jobs run in-process");
    Ok(Arc::new(InProcessJobRunner::new(
        executor,
        PlanTemplate::from_settings(&settings.builder, work_root),
    )))
}
