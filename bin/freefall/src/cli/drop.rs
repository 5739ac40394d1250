use std::{sync::Arc, time::Duration};

use clap::Args;
use freefall_core::{
    fall::Coordinator,
    runtime::{Address, Id, ProcessShutdown},
};
use freefall_error::{generic_error, ErrorContext as _, GenericError};
use tokio::{select, sync::mpsc, time::sleep};
use tracing::debug;

use crate::config::FreefallConfiguration;

/// Computes a single fall.
#[derive(Args, Debug)]
pub struct DropCommand {
    /// Body to drop the object on, such as `earth`.
    pub body: String,

    /// Fall distance, in meters.
    #[arg(allow_negative_numbers = true)]
    pub distance: f64,

    /// How long to wait for the report, in milliseconds.
    #[arg(long = "wait-ms", default_value_t = 1000)]
    pub wait_ms: u64,
}

/// Entrypoint for the `drop` command.
///
/// Fails if the worker crashed on the request, or if no report arrived in time.
pub async fn handle_drop_command(config: &FreefallConfiguration, cmd: DropCommand) -> Result<(), GenericError> {
    let gravity = Arc::new(config.gravity_table()?);

    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    let reports = Address::from_sender(Id::new(), reports_tx);
    let coordinator = Coordinator::new(config.coordinator_name(), gravity, reports)?;

    let (shutdown, shutdown_handle) = ProcessShutdown::paired();
    let (handle, coordinator_task) = coordinator.spawn(shutdown);

    handle.submit(cmd.body.clone(), cmd.distance)?;

    let outcome = select! {
        report = reports_rx.recv() => match report {
            Some(report) => {
                println!("{}", report);
                Ok(())
            },
            None => Err(generic_error!("Coordinator stopped before reporting.")),
        },
        status = handle.wait_for_restarts(1) => {
            let status = status?;
            debug!(worker_id = %status.current_worker, "Worker was replaced.");
            Err(generic_error!(
                "Worker crashed on a fall of {} meters on '{}'. No result.",
                cmd.distance,
                cmd.body
            ))
        },
        _ = sleep(Duration::from_millis(cmd.wait_ms)) => Err(generic_error!(
            "No result arrived within {} ms. The request may have been lost.",
            cmd.wait_ms
        )),
    };

    shutdown_handle.trigger();
    coordinator_task.await.error_context("Coordinator did not exit cleanly.")??;

    outcome
}
