use clap::Args;
use freefall_core::counter::{Counter, CounterMessage, CounterRegistry};
use freefall_error::{generic_error, ErrorContext as _, GenericError};
use tokio::sync::oneshot;

const COUNTER_NAME: &str = "message_counter";

/// Sends messages to a registered counter.
#[derive(Args, Debug)]
pub struct CountCommand {
    /// Messages to send.
    #[arg(required = true)]
    pub messages: Vec<String>,
}

/// Entrypoint for the `count` command.
///
/// The messages are sent to whatever the registry resolves the counter's name to, not through the handle returned
/// when spawning it.
pub async fn handle_count_command(cmd: CountCommand) -> Result<(), GenericError> {
    let registry = CounterRegistry::new();
    let counter = Counter::spawn(&registry, COUNTER_NAME).error_context("Failed to spawn counter.")?;

    let address = registry
        .lookup(COUNTER_NAME)
        .ok_or_else(|| generic_error!("Counter '{}' is not registered.", COUNTER_NAME))?;
    for message in cmd.messages {
        address
            .send(CounterMessage::Record(message))
            .error_context("Failed to send message to counter.")?;
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    address
        .send(CounterMessage::Report(reply_tx))
        .error_context("Failed to query counter.")?;
    let count = reply_rx.await.error_context("Counter stopped before reporting.")?;

    counter.stop().await?;
    println!("Counted {} messages.", count);
    Ok(())
}
