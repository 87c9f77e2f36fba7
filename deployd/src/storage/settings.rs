//! Settings file management

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::artifacts::gcs::DEFAULT_API_BASE_URL;
use crate::logs::LogLevel;

/// Top-level settings
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Orchestrator procedure surface
    #[serde(default)]
    pub api: ApiSettings,

    /// Edge router
    #[serde(default)]
    pub router: RouterSettings,

    /// Record store
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Event bus
    #[serde(default)]
    pub event_bus: EventBusSettings,

    /// Artifact store
    #[serde(default)]
    pub artifacts: ArtifactSettings,

    /// Build commands and directories
    #[serde(default)]
    pub builder: BuilderSettings,

    /// Orchestrator behavior
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Seconds to wait for in-flight work on shutdown
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            api: ApiSettings::default(),
            router: RouterSettings::default(),
            database: DatabaseSettings::default(),
            event_bus: EventBusSettings::default(),
            artifacts: ArtifactSettings::default(),
            builder: BuilderSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

/// Orchestrator HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Edge router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_router_host")]
    pub host: String,

    #[serde(default = "default_router_port")]
    pub port: u16,

    /// Public prefix under which `{projectKey}/{path}` is fetched
    #[serde(default = "default_artifact_base_url")]
    pub artifact_base_url: String,
}

fn default_router_host() -> String {
    "0.0.0.0".to_string()
}

fn default_router_port() -> u16 {
    8000
}

fn default_artifact_base_url() -> String {
    "https://storage.googleapis.com/cloudeploy_assets/__outputs".to_string()
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_router_host(),
            port: default_router_port(),
            artifact_base_url: default_artifact_base_url(),
        }
    }
}

/// Record store settings
#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Postgres connection string; the in-memory store is used when absent
    #[serde(default)]
    pub url: Option<SecretString>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Create tables on startup if they do not exist
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            run_migrations: false,
        }
    }
}

/// Event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    /// Broker URL, e.g. `mqtt://localhost:1883`; in-process bus when absent
    #[serde(default)]
    pub url: Option<String>,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            url: None,
            ca_cert_path: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Artifact backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackend {
    #[default]
    Gcs,
    Local,
}

impl std::str::FromStr for ArtifactBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gcs" => Ok(ArtifactBackend::Gcs),
            "local" => Ok(ArtifactBackend::Local),
            _ => Err(format!("Invalid artifact backend: {}", s)),
        }
    }
}

/// Artifact store settings
#[derive(Debug, Deserialize)]
pub struct ArtifactSettings {
    #[serde(default)]
    pub backend: ArtifactBackend,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_storage_api_url")]
    pub api_base_url: String,

    /// Bearer token for uploads
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Root directory for the local backend
    #[serde(default)]
    pub local_dir: Option<String>,
}

fn default_bucket() -> String {
    "cloudeploy_assets".to_string()
}

fn default_storage_api_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            backend: ArtifactBackend::Gcs,
            bucket: default_bucket(),
            api_base_url: default_storage_api_url(),
            token: None,
            local_dir: None,
        }
    }
}

/// Build step settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderSettings {
    #[serde(default = "default_install_command")]
    pub install_command: String,

    #[serde(default = "default_build_command")]
    pub build_command: String,

    /// Build output directory, relative to the source checkout
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Parent of per-project checkouts; defaults to the layout's builds dir
    #[serde(default)]
    pub work_dir: Option<String>,

    /// Executable launched for each build; defaults to the running binary
    #[serde(default)]
    pub executable: Option<String>,
}

fn default_install_command() -> String {
    "npm install".to_string()
}

fn default_build_command() -> String {
    "npm run build".to_string()
}

fn default_output_dir() -> String {
    "dist".to_string()
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            install_command: default_install_command(),
            build_command: default_build_command(),
            output_dir: default_output_dir(),
            work_dir: None,
            executable: None,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Reject a new deployment while another for the same project is driven
    #[serde(default)]
    pub exclusive_builds: bool,

    /// How long to keep draining build events after the job finished
    #[serde(default = "default_log_drain_grace_ms")]
    pub log_drain_grace_ms: u64,
}

fn default_log_drain_grace_ms() -> u64 {
    250
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            exclusive_builds: false,
            log_drain_grace_ms: default_log_drain_grace_ms(),
        }
    }
}
