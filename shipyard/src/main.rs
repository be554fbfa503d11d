//! Shipyard - Entry Point
//!
//! Deployment daemon driving docker compose projects on remote hosts over SSH.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use shipyard::app::options::AppOptions;
use shipyard::app::run::run;
use shipyard::filesys::file::File;
use shipyard::logs::{init_logging, LogLevel, LogOptions};
use shipyard::remote::ssh::{SshExecutor, SshOptions};
use shipyard::storage::layout::StorageLayout;
use shipyard::storage::settings::Settings;
use shipyard::utils::version_info;

#[derive(Parser, Debug)]
#[command(name = "shipyard", about = "Remote deployment daemon for docker compose projects")]
struct Cli {
    /// Settings file, defaults to settings.json in the data directory
    #[arg(long, env = "SHIPYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding projects, history and logs
    #[arg(long, env = "SHIPYARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long, env = "SHIPYARD_HOST")]
    host: Option<String>,

    /// Port of the HTTP server
    #[arg(long, env = "SHIPYARD_PORT")]
    port: Option<u16>,

    /// trace, debug, info, warn or error
    #[arg(long, env = "SHIPYARD_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print version information as JSON and exit
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Print version and exit
    if cli.version {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode version: {}", e),
        }
        return;
    }

    if let Err(e) = start(cli).await {
        error!("Shipyard exited with an error: {:#}", e);
        eprintln!("shipyard: {:#}", e);
        std::process::exit(1);
    }
}

async fn start(cli: Cli) -> anyhow::Result<()> {
    let layout = cli
        .data_dir
        .clone()
        .map(StorageLayout::new)
        .unwrap_or_default();

    // Retrieve the settings file, every field has a default
    let settings_file = cli
        .config
        .clone()
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());
    let mut settings: Settings = settings_file
        .read_json_or_default()
        .await
        .with_context(|| format!("unable to read {}", settings_file.path().display()))?;
    apply_overrides(&cli, &mut settings);

    // Initialize logging; the guard flushes file output on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = init_logging(log_options).context("failed to initialize logging")?;

    let options = AppOptions::from_settings(layout, &settings);
    info!("Running Shipyard with options: {:?}", options);

    let executor = Arc::new(SshExecutor::new(SshOptions::default()));
    run(options, executor, await_shutdown_signal()).await?;
    Ok(())
}

fn apply_overrides(cli: &Cli, settings: &mut Settings) {
    if let Some(host) = &cli.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    if cli.log_json {
        settings.log_json = true;
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
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
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
