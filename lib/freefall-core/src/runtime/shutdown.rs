use std::{
    fmt,
    future::{pending, Future},
    pin::Pin,
};

use tokio::sync::oneshot;

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A shutdown signal for a process.
///
/// Long-running processes select on [`wait_for_shutdown`][Self::wait_for_shutdown] alongside their inbox so that they
/// can be told to stop from the outside.
pub struct ProcessShutdown {
    shutdown: Option<ShutdownFuture>,
}

/// A handle to trigger process shutdown.
pub struct ShutdownHandle {
    shutdown_tx: oneshot::Sender<()>,
}

impl ProcessShutdown {
    /// Creates a new `ProcessShutdown` and `ShutdownHandle` pair.
    ///
    /// `ProcessShutdown` resolves when the handle is triggered or dropped.
    pub fn paired() -> (Self, ShutdownHandle) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let process_shutdown = Self::wrapped(async move {
            let _ = shutdown_rx.await;
        });

        (process_shutdown, ShutdownHandle { shutdown_tx })
    }

    /// Creates a new `ProcessShutdown` that resolves once `future` resolves.
    pub fn wrapped<F: Future + Send + 'static>(future: F) -> Self {
        Self {
            shutdown: Some(Box::pin(async move {
                future.await;
            })),
        }
    }

    /// Creates a new `ProcessShutdown` that never resolves.
    ///
    /// Processes started this way only stop once their inbox closes.
    pub fn noop() -> Self {
        Self::wrapped(pending::<()>())
    }

    /// Waits for the shutdown signal to be received.
    ///
    /// Once the signal has been observed, every later call returns immediately. The future returned here must be
    /// driven to completion (or kept pinned across loop iterations): dropping it early consumes the signal.
    pub async fn wait_for_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.await;
        }
    }
}

impl fmt::Debug for ProcessShutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessShutdown")
            .field("observed", &self.shutdown.is_none())
            .finish()
    }
}

impl ShutdownHandle {
    /// Triggers the process to shutdown.
    pub fn trigger(self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn paired_resolves_on_trigger() {
        let (mut shutdown, handle) = ProcessShutdown::paired();
        handle.trigger();

        timeout(Duration::from_secs(1), shutdown.wait_for_shutdown()).await.unwrap();
        // Subsequent waits return immediately.
        timeout(Duration::from_millis(10), shutdown.wait_for_shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn paired_resolves_on_drop() {
        let (mut shutdown, handle) = ProcessShutdown::paired();
        drop(handle);

        timeout(Duration::from_secs(1), shutdown.wait_for_shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn noop_never_resolves() {
        let mut shutdown = ProcessShutdown::noop();
        assert!(timeout(Duration::from_millis(50), shutdown.wait_for_shutdown()).await.is_err());
    }
}
