//! cloudeploy - Entry Point
//!
//! Without flags, runs the orchestrator API and the edge router.
//! With `--build`, runs a single build job configured from the environment.

use std::env;
use std::path::PathBuf;

use cloudeploy::app::build::run_build_job;
use cloudeploy::app::options::AppOptions;
use cloudeploy::app::run::run;
use cloudeploy::deploy::env::BuildEnv;
use cloudeploy::filesys::file::File;
use cloudeploy::logs::{init_logging, LogOptions};
use cloudeploy::storage::layout::StorageLayout;
use cloudeploy::storage::settings::Settings;
use cloudeploy::utils::{parse_cli_args, version_info};

use tracing::{error, info};

const DEFAULT_SETTINGS_PATH: &str = "/etc/cloudeploy/settings.json";

#[tokio::main]
async fn main() {
    let cli_args = parse_cli_args(env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Run a single build job
    if cli_args.contains_key("build") {
        let code = build_job().await;
        std::process::exit(code);
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    let settings_file = File::new(settings_path);
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!(
                    "Unable to read settings file {}: {}",
                    settings_file.path().display(),
                    e
                );
                std::process::exit(1);
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let layout = StorageLayout::default();
    let options = AppOptions::from_settings(&settings, layout);

    info!("Running cloudeploy {} with options: {:?}", version.version, options);
    if let Err(e) = run(&settings, options, await_shutdown_signal()).await {
        error!("Failed to run cloudeploy: {e}");
        std::process::exit(1);
    }
}

/// Returns the process exit code
async fn build_job() -> i32 {
    if let Err(e) = init_logging(LogOptions::default()) {
        println!("Failed to initialize logging: {e}");
    }

    let build_env = match BuildEnv::from_env() {
        Ok(build_env) => build_env,
        Err(e) => {
            error!("Invalid build environment: {e}");
            return 2;
        }
    };

    match run_build_job(build_env).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("Build job failed to start: {e}");
            1
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
