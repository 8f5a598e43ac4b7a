//! The `tether` binary: log in to a heartbeat-supervised server and issue
//! requests from a prompt.

mod console;
mod platform;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tether_config::{CliArgs, Config};
use tether_log::{FileEventLog, init_logging};
use tether_net::ConnectionManager;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::platform::PlatformDirs;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let dirs = match PlatformDirs::resolve() {
        Ok(dirs) => dirs.with_config_dir(args.config.clone()),
        Err(e) => {
            eprintln!("Failed to resolve platform directories: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = dirs.create_dirs() {
        eprintln!("Failed to initialize platform directories: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = Config::load_or_create(&dirs.config_dir).unwrap_or_else(|e| {
        eprintln!("Using default configuration: {e}");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    init_logging(Some(&dirs.log_dir), config.log.file_logging, Some(&config));
    tracing::info!(config_dir = %dirs.config_dir.display(), "Starting tether");

    let events = FileEventLog::open(settings::event_log_path(&config, &dirs.data_dir));
    tracing::info!(event_log = %events.path().display(), "Event log opened");

    let manager = ConnectionManager::new(settings::client_config(&config), Arc::new(events));
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut out = std::io::stdout();

    let identity = config.network.identity.clone();
    match console::login_with_retry(&manager, &identity, &mut input, &mut out).await {
        Ok(true) => {}
        Ok(false) => return ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Console error: {e}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = console::run(&manager, &mut input, &mut out).await {
        eprintln!("Console error: {e}");
        manager.logout();
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
