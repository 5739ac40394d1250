use std::{fmt, future::Future};

use freefall_error::GenericError;
use tokio::task::AbortHandle;
use tracing::{debug, Instrument as _};

use super::{
    address::Address,
    process::{Id, Name, Process, ProcessExt as _},
};

/// Why a linked process terminated.
#[derive(Debug)]
pub enum ExitReason {
    /// The process future completed successfully.
    Normal,

    /// The process future returned an error.
    Failed(GenericError),

    /// The process panicked.
    Panicked,

    /// The process was aborted, usually because its link was dropped.
    Aborted,
}

impl ExitReason {
    /// Returns `true` if the process did not terminate normally.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Failed(e) => write!(f, "failed: {:#}", e),
            Self::Panicked => f.write_str("panicked"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Notification that a linked process has terminated.
///
/// Delivered exactly once per linked process, to the address given when the link was established.
#[derive(Debug)]
pub struct ExitSignal {
    process_id: Id,
    process_name: Name,
    reason: ExitReason,
}

impl ExitSignal {
    pub(crate) fn new(process_id: Id, process_name: Name, reason: ExitReason) -> Self {
        Self {
            process_id,
            process_name,
            reason,
        }
    }

    /// Returns the identifier of the process that terminated.
    pub fn process_id(&self) -> Id {
        self.process_id
    }

    /// Returns the name of the process that terminated.
    pub fn process_name(&self) -> &Name {
        &self.process_name
    }

    /// Returns the reason the process terminated.
    pub fn reason(&self) -> &ExitReason {
        &self.reason
    }

    /// Consumes the signal, returning the reason the process terminated.
    pub fn into_reason(self) -> ExitReason {
        self.reason
    }
}

/// The linking side of a spawned process.
///
/// The link works in both directions:
///
/// - when the process terminates, for any reason, an [`ExitSignal`] is posted to the address given at spawn time
///   instead of the failure propagating to the linking process
/// - when the `LinkedProcess` is dropped, the process is aborted, so a linked child never outlives its owner
pub struct LinkedProcess {
    process: Process,
    abort_handle: AbortHandle,
}

impl LinkedProcess {
    /// Returns the identifier of the linked process.
    pub fn id(&self) -> Id {
        self.process.id()
    }

    /// Returns the name of the linked process.
    pub fn name(&self) -> &Name {
        self.process.name()
    }

    /// Returns `true` if the linked process has terminated.
    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}

impl Drop for LinkedProcess {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

impl fmt::Debug for LinkedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedProcess")
            .field("id", &self.id())
            .field("name", self.name())
            .finish()
    }
}

/// Spawns `future` as `process` on the current Tokio runtime, linked to the caller.
///
/// A watcher task awaits the process and converts its outcome, including panics, into an [`ExitSignal`] which is sent
/// to `exits`. If `exits` no longer accepts messages, the signal is discarded.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
pub fn spawn_linked<F>(process: Process, future: F, exits: Address<ExitSignal>) -> LinkedProcess
where
    F: Future<Output = Result<(), GenericError>> + Send + 'static,
{
    let process_id = process.id();
    let process_name = process.name().clone();

    let join_handle = tokio::spawn(future.into_instrumented(process.clone()));
    let abort_handle = join_handle.abort_handle();

    let watcher = async move {
        let reason = match join_handle.await {
            Ok(Ok(())) => ExitReason::Normal,
            Ok(Err(e)) => ExitReason::Failed(e),
            Err(e) if e.is_cancelled() => ExitReason::Aborted,
            Err(_) => ExitReason::Panicked,
        };

        debug!(%process_id, %process_name, %reason, "Linked process exited.");

        if exits.send(ExitSignal::new(process_id, process_name, reason)).is_err() {
            debug!(%process_id, "Linking process is gone. Discarding exit signal.");
        }
    };
    tokio::spawn(watcher.in_current_span());

    LinkedProcess { process, abort_handle }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use freefall_error::generic_error;
    use tokio::{sync::mpsc, time::timeout};

    use super::*;

    fn exit_channel() -> (Address<ExitSignal>, mpsc::UnboundedReceiver<ExitSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Address::from_sender(Id::new(), tx), rx)
    }

    async fn next_exit(rx: &mut mpsc::UnboundedReceiver<ExitSignal>) -> ExitSignal {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn normal_exit_is_reported() {
        let (exits, mut rx) = exit_channel();
        let process = Process::root("normal").unwrap();
        let link = spawn_linked(process, async { Ok(()) }, exits);

        let signal = next_exit(&mut rx).await;
        assert_eq!(signal.process_id(), link.id());
        assert!(matches!(signal.reason(), ExitReason::Normal));
        assert!(!signal.reason().is_abnormal());
    }

    #[tokio::test]
    async fn error_exit_is_reported_with_cause() {
        let (exits, mut rx) = exit_channel();
        let process = Process::root("failing").unwrap();
        let link = spawn_linked(process, async { Err(generic_error!("no matching rule")) }, exits);

        let signal = next_exit(&mut rx).await;
        assert_eq!(signal.process_id(), link.id());
        assert_eq!(signal.reason().to_string(), "failed: no matching rule");
        assert!(signal.reason().is_abnormal());
    }

    #[tokio::test]
    async fn panic_is_captured() {
        let (exits, mut rx) = exit_channel();
        let process = Process::root("panicking").unwrap();
        let _link = spawn_linked(
            process,
            async {
                panic!("worker hit unrecoverable error");
            },
            exits,
        );

        let signal = next_exit(&mut rx).await;
        assert!(matches!(signal.into_reason(), ExitReason::Panicked));
    }

    #[tokio::test]
    async fn dropping_link_aborts_process() {
        let (exits, mut rx) = exit_channel();
        let process = Process::root("long_running").unwrap();
        let link = spawn_linked(
            process,
            async {
                std::future::pending::<()>().await;
                Ok(())
            },
            exits,
        );

        assert!(!link.is_finished());
        drop(link);

        let signal = next_exit(&mut rx).await;
        assert!(matches!(signal.reason(), ExitReason::Aborted));
    }

    #[tokio::test]
    async fn exit_signal_is_discarded_when_linker_is_gone() {
        let (exits, rx) = exit_channel();
        drop(rx);

        let process = Process::root("orphan").unwrap();
        let link = spawn_linked(process, async { Err(generic_error!("boom")) }, exits);

        // Nothing to observe other than the process finishing without the watcher panicking.
        timeout(Duration::from_secs(2), async {
            while !link.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
