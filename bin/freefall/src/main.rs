//! Supervised fall velocity calculator.
//!
//! A coordinator process forwards requests to a worker process that computes how fast an object is moving after falling
//! a given distance on a given body. Requests the worker cannot handle crash it, and the coordinator replaces it.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser as _;
use freefall_app::prelude::*;
use freefall_error::GenericError;
use tracing::{error, info};

mod cli;
use self::cli::{
    handle_bodies_command, handle_count_command, handle_drop_command, handle_run_command, Action, Cli,
};

mod config;
use self::config::{load_configuration, FreefallConfiguration};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(cli.config_file.as_deref())
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:#}", e)));

    let logging_config = LoggingConfiguration::from_configuration(&configuration).unwrap_or_else(|e| {
        fatal_and_exit(format!("failed to load logging configuration: {:#}", e))
    });

    let logging_guard = initialize_logging(&logging_config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {:#}", e)));

    let exit_code = match run(cli.action, &configuration).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    // Flush pending logs before exiting, since `exit` skips destructors.
    drop(logging_guard);
    std::process::exit(exit_code);
}

async fn run(action: Action, configuration: &freefall_config::GenericConfiguration) -> Result<(), GenericError> {
    let config = FreefallConfiguration::from_configuration(configuration)?;

    match action {
        Action::Run(cmd) => {
            info!("freefall starting.");
            handle_run_command(&config, cmd).await
        }
        Action::Drop(cmd) => handle_drop_command(&config, cmd).await,
        Action::Bodies(cmd) => handle_bodies_command(&config, cmd),
        Action::Count(cmd) => handle_count_command(cmd).await,
    }
}
