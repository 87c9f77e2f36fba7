//! Application configuration options

use std::time::Duration;

use crate::orchestrator::OrchestratorOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable the orchestrator API server
    pub enable_api: bool,

    /// API server configuration
    pub api: ServerOptions,

    /// Enable the edge router
    pub enable_router: bool,

    /// Edge router configuration
    pub router: ServerOptions,

    /// Prefix under which artifact trees are fetched by the edge router
    pub artifact_base_url: String,

    /// Orchestrator behavior
    pub orchestrator: OrchestratorOptions,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            layout,
            enable_api: settings.api.enabled,
            api: ServerOptions {
                host: settings.api.host.clone(),
                port: settings.api.port,
            },
            enable_router: settings.router.enabled,
            router: ServerOptions {
                host: settings.router.host.clone(),
                port: settings.router.port,
            },
            artifact_base_url: settings.router.artifact_base_url.clone(),
            orchestrator: OrchestratorOptions::from(&settings.orchestrator),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Listener options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}
