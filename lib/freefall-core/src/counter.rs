//! A registered process that counts the messages it receives.
//!
//! The counter is the smallest useful process: it owns a single number, never shares it, and only changes it in
//! response to messages. It registers itself under a logical name so that other code can reach it through a
//! [`Registry`] lookup instead of being handed its address.

use freefall_error::{ErrorContext as _, GenericError};
use snafu::{ResultExt as _, Snafu};
use tokio::{
    pin, select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::runtime::{
    Address, Id, Process, ProcessExt as _, ProcessShutdown, Registry, RegistryError, SendError, ShutdownHandle,
};

/// Registry of counters, keyed by name.
pub type CounterRegistry = Registry<Address<CounterMessage>>;

/// Counter errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CounterError {
    /// The counter name is invalid.
    #[snafu(display("Invalid counter name: '{}'", name))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The counter could not be registered.
    #[snafu(display("Failed to register counter: {}", source))]
    Registration {
        /// The registry failure.
        source: RegistryError,
    },

    /// The counter has stopped.
    #[snafu(display("Counter has stopped."))]
    Stopped {
        /// The underlying send failure.
        source: SendError,
    },

    /// The counter stopped before answering.
    #[snafu(display("Counter stopped before reporting its count."))]
    NoReport,
}

/// Messages understood by a counter.
#[derive(Debug)]
pub enum CounterMessage {
    /// Counts one message and logs its payload.
    Record(String),

    /// Asks for the number of messages counted so far.
    Report(oneshot::Sender<u64>),
}

/// A process that counts the messages it receives.
pub struct Counter {
    name: String,
    process_id: Id,
    registry: CounterRegistry,
    count: u64,
}

impl Counter {
    /// Spawns a counter and registers it in `registry` under `name`.
    ///
    /// The registered address does not keep the counter alive. The counter runs until the returned handle is stopped
    /// or dropped, and then unregisters itself.
    ///
    /// # Errors
    ///
    /// If `name` is invalid, or already registered, an error is returned and nothing is spawned.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(registry: &CounterRegistry, name: &str) -> Result<CounterHandle, CounterError> {
        let process = Process::root(name).ok_or_else(|| CounterError::InvalidName { name: name.to_string() })?;
        let process_id = process.id();

        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        registry
            .register(name, Address::weak(process_id, &messages_tx))
            .context(Registration)?;

        let counter = Counter {
            name: name.to_string(),
            process_id,
            registry: registry.clone(),
            count: 0,
        };

        let (shutdown, shutdown_handle) = ProcessShutdown::paired();
        let task = tokio::spawn(counter.run(messages_rx, shutdown).into_instrumented(process));

        Ok(CounterHandle {
            address: Address::from_sender(process_id, messages_tx),
            shutdown_handle,
            task,
        })
    }

    async fn run(
        mut self, mut messages: mpsc::UnboundedReceiver<CounterMessage>, mut process_shutdown: ProcessShutdown,
    ) -> Result<(), GenericError> {
        let shutdown = process_shutdown.wait_for_shutdown();
        pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                message = messages.recv() => match message {
                    Some(CounterMessage::Record(payload)) => {
                        self.count += 1;
                        info!("Received message #{}: {}", self.count, payload);
                    },
                    Some(CounterMessage::Report(reply)) => {
                        let _ = reply.send(self.count);
                    },
                    None => break,
                },
            }
        }

        let process_id = self.process_id;
        self.registry
            .unregister_if(&self.name, |address| address.process_id() == process_id);
        debug!(count = self.count, "Counter stopped.");

        Ok(())
    }
}

/// Handle to a running [`Counter`].
///
/// Dropping the handle stops the counter.
pub struct CounterHandle {
    address: Address<CounterMessage>,
    shutdown_handle: ShutdownHandle,
    task: JoinHandle<Result<(), GenericError>>,
}

impl CounterHandle {
    /// Returns the counter's address.
    pub fn address(&self) -> &Address<CounterMessage> {
        &self.address
    }

    /// Records a message.
    ///
    /// # Errors
    ///
    /// If the counter has stopped, an error is returned.
    pub fn record<S: Into<String>>(&self, payload: S) -> Result<(), CounterError> {
        self.address
            .send(CounterMessage::Record(payload.into()))
            .context(Stopped)
    }

    /// Returns the number of messages counted so far.
    ///
    /// Messages sent through this handle before the call are always included.
    ///
    /// # Errors
    ///
    /// If the counter has stopped, an error is returned.
    pub async fn count(&self) -> Result<u64, CounterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.address.send(CounterMessage::Report(reply_tx)).context(Stopped)?;
        reply_rx.await.map_err(|_| CounterError::NoReport)
    }

    /// Stops the counter and waits for it to unregister itself.
    ///
    /// # Errors
    ///
    /// If the counter process did not exit cleanly, an error is returned.
    pub async fn stop(self) -> Result<(), GenericError> {
        let Self {
            address,
            shutdown_handle,
            task,
        } = self;

        shutdown_handle.trigger();
        drop(address);

        task.await.error_context("Counter process did not exit cleanly.")?
    }
}
