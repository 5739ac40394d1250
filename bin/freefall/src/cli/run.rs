use std::{sync::Arc, time::Duration};

use clap::Args;
use freefall_core::{
    fall::{Coordinator, DropReport},
    runtime::{Address, Id, ProcessShutdown},
};
use freefall_error::{generic_error, ErrorContext as _, GenericError};
use tokio::{
    io::{stdin, stdout, AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, Stdout},
    pin, select,
    signal::ctrl_c,
    sync::mpsc,
    time::timeout,
};
use tracing::{info, warn};

use crate::config::FreefallConfiguration;

/// Reads requests from standard input.
#[derive(Args, Debug)]
pub struct RunCommand {
    /// How long to keep waiting for outstanding reports once input ends, in milliseconds.
    #[arg(long = "drain-ms", default_value_t = 500)]
    pub drain_ms: u64,
}

/// Entrypoint for the `run` command.
///
/// Each input line is a request of the form `<body> <distance>`. Blank lines are ignored, and malformed lines are
/// logged and skipped. Reports are printed to standard output as they arrive. The command stops at the end of input, or
/// on Ctrl-C.
pub async fn handle_run_command(config: &FreefallConfiguration, cmd: RunCommand) -> Result<(), GenericError> {
    let gravity = Arc::new(config.gravity_table()?);

    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    let reports = Address::from_sender(Id::new(), reports_tx);
    let coordinator = Coordinator::new(config.coordinator_name(), gravity, reports)?;

    let (shutdown, shutdown_handle) = ProcessShutdown::paired();
    let (handle, coordinator_task) = coordinator.spawn(shutdown);
    info!(coordinator = config.coordinator_name(), "Coordinator running, waiting for requests.");

    let mut out = stdout();
    let mut lines = BufReader::new(stdin()).lines();
    let mut interrupted = false;

    let interrupt = ctrl_c();
    pin!(interrupt);

    loop {
        select! {
            _ = &mut interrupt => {
                info!("Received interrupt, stopping.");
                interrupted = true;
                break;
            },
            report = reports_rx.recv() => match report {
                Some(report) => print_report(&mut out, &report).await?,
                None => return Err(generic_error!("Report sink closed unexpectedly.")),
            },
            line = lines.next_line() => match line.error_context("Failed to read from standard input.")? {
                Some(line) => match parse_request(&line) {
                    Ok(Some((body, distance))) => handle.submit(body, distance)?,
                    Ok(None) => {},
                    Err(e) => warn!(line = line.as_str(), "Skipping malformed request: {:#}", e),
                },
                None => break,
            },
        }
    }

    if !interrupted {
        // Input is exhausted. Print whatever is still in flight until the coordinator goes quiet.
        let drain = Duration::from_millis(cmd.drain_ms);
        while let Ok(Some(report)) = timeout(drain, reports_rx.recv()).await {
            print_report(&mut out, &report).await?;
        }
    }

    let status = handle.status();
    shutdown_handle.trigger();
    coordinator_task.await.error_context("Coordinator did not exit cleanly.")??;

    info!(restarts = status.restarts, "Coordinator stopped.");
    Ok(())
}

async fn print_report(out: &mut Stdout, report: &DropReport) -> Result<(), GenericError> {
    let line = format!("{}\n", report);
    out.write_all(line.as_bytes())
        .await
        .error_context("Failed to write report.")?;
    out.flush().await.error_context("Failed to write report.")
}

/// Parses a `<body> <distance>` request line.
///
/// Returns `Ok(None)` for blank lines. Out-of-domain values, such as negative distances, parse fine: rejecting them is
/// the worker's job.
fn parse_request(line: &str) -> Result<Option<(String, f64)>, GenericError> {
    let mut parts = line.split_whitespace();
    let Some(body) = parts.next() else {
        return Ok(None);
    };

    let distance = parts
        .next()
        .ok_or_else(|| generic_error!("missing distance"))?
        .parse::<f64>()
        .error_context("distance is not a number")?;

    if parts.next().is_some() {
        return Err(generic_error!("expected exactly two fields"));
    }

    Ok(Some((body.to_string(), distance)))
}
