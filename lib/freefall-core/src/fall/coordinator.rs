use std::sync::Arc;

use freefall_error::GenericError;
use metrics::{counter, Counter};
use snafu::{ResultExt as _, Snafu};
use tokio::{
    pin, select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::{
    gravity::GravityTable,
    messages::{DropReply, DropReport, DropRequest},
    worker::{DropWorker, WorkerHandle},
};
use crate::runtime::{Address, ExitSignal, Id, Name, Process, ProcessExt as _, ProcessShutdown, SendError};

/// Coordinator errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CoordinatorError {
    /// The coordinator name is invalid.
    #[snafu(display("Invalid coordinator name: '{}'", name))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The coordinator has stopped.
    #[snafu(display("Coordinator has stopped."))]
    Stopped {
        /// The underlying send failure.
        source: SendError,
    },

    /// The coordinator stopped before the awaited condition was reached.
    #[snafu(display("Coordinator stopped while waiting for status changes."))]
    StatusClosed,
}

/// Snapshot of the coordinator's supervision state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Identifier of the worker currently serving requests.
    pub current_worker: Id,

    /// Number of times the worker has been replaced.
    pub restarts: u64,
}

enum Message {
    Submit { body: String, distance: f64 },
    Reply(DropReply),
    Exit(ExitSignal),
}

struct Telemetry {
    requests_total: Counter,
    replies_total: Counter,
    worker_restarts_total: Counter,
    stale_exit_signals_total: Counter,
}

impl Telemetry {
    fn new(coordinator_name: &Name) -> Self {
        let name = coordinator_name.to_string();
        Self {
            requests_total: counter!("freefall_requests_total", "coordinator" => name.clone()),
            replies_total: counter!("freefall_replies_total", "coordinator" => name.clone()),
            worker_restarts_total: counter!("freefall_worker_restarts_total", "coordinator" => name.clone()),
            stale_exit_signals_total: counter!("freefall_stale_exit_signals_total", "coordinator" => name),
        }
    }
}

/// Supervises a single [`DropWorker`], restarting it whenever it terminates.
///
/// Requests submitted through a [`CoordinatorHandle`] are forwarded to the current worker, and the worker's replies are
/// converted to miles per hour and forwarded to the report sink. Requests, replies and worker exit signals all arrive
/// through one inbox and are handled one at a time, in arrival order.
///
/// Restarts are unconditional and unbounded: there is no backoff, and a worker that fails on every request is replaced
/// on every request. A request that reaches a worker after it has failed, but before the coordinator has seen the exit
/// signal, is lost.
pub struct Coordinator {
    process: Process,
    worker_name: Name,
    gravity: Arc<GravityTable>,
    reports: Address<DropReport>,
}

impl Coordinator {
    /// Creates a new `Coordinator`.
    ///
    /// Workers are named `<name>.worker`.
    ///
    /// # Errors
    ///
    /// If `name` is not a valid process name, an error is returned.
    pub fn new(name: &str, gravity: Arc<GravityTable>, reports: Address<DropReport>) -> Result<Self, CoordinatorError> {
        let process = Process::root(name).ok_or_else(|| CoordinatorError::InvalidName { name: name.to_string() })?;
        let worker_name =
            Name::scoped(process.name(), "worker").ok_or_else(|| CoordinatorError::InvalidName { name: name.to_string() })?;

        Ok(Self {
            process,
            worker_name,
            gravity,
            reports,
        })
    }

    /// Spawns the coordinator, and its first worker, on the current Tokio runtime.
    ///
    /// The coordinator runs until `shutdown` resolves, or until every [`CoordinatorHandle`] has been dropped. Either
    /// way, the current worker is aborted when it stops.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(self, shutdown: ProcessShutdown) -> (CoordinatorHandle, JoinHandle<Result<(), GenericError>>) {
        let worker = DropWorker::new(Arc::clone(&self.gravity));
        self.spawn_with_initial_worker(shutdown, move |process, exits| worker.spawn(process, exits))
    }

    fn spawn_with_initial_worker<F>(
        self, shutdown: ProcessShutdown, spawn_initial: F,
    ) -> (CoordinatorHandle, JoinHandle<Result<(), GenericError>>)
    where
        F: FnOnce(Process, Address<ExitSignal>) -> WorkerHandle,
    {
        let Self {
            process,
            worker_name,
            gravity,
            reports,
        } = self;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let self_address = Address::weak(process.id(), &inbox_tx);
        let inbox = Address::from_sender(process.id(), inbox_tx);

        let worker = DropWorker::new(gravity);
        let exits = self_address.map(Message::Exit);
        let current = spawn_initial(Process::named(worker_name.clone()), exits.clone());
        debug!(coordinator = %process.name(), worker_id = %current.id(), "Started initial worker.");

        let (status_tx, status_rx) = watch::channel(CoordinatorStatus {
            current_worker: current.id(),
            restarts: 0,
        });

        let state = CoordinatorState {
            telemetry: Telemetry::new(process.name()),
            worker,
            worker_name,
            replies: self_address.map(Message::Reply),
            exits,
            reports,
            current,
            restarts: 0,
            status: status_tx,
        };
        let join_handle = tokio::spawn(state.run(inbox_rx, shutdown).into_instrumented(process));

        let handle = CoordinatorHandle {
            inbox,
            status: status_rx,
        };
        (handle, join_handle)
    }
}

struct CoordinatorState {
    telemetry: Telemetry,
    worker: DropWorker,
    worker_name: Name,
    replies: Address<DropReply>,
    exits: Address<ExitSignal>,
    reports: Address<DropReport>,
    current: WorkerHandle,
    restarts: u64,
    status: watch::Sender<CoordinatorStatus>,
}

impl CoordinatorState {
    async fn run(
        mut self, mut inbox: mpsc::UnboundedReceiver<Message>, mut process_shutdown: ProcessShutdown,
    ) -> Result<(), GenericError> {
        debug!("Coordinator starting.");

        let shutdown = process_shutdown.wait_for_shutdown();
        pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    debug!("Shutdown triggered, stopping coordinator.");
                    break;
                },
                message = inbox.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        debug!("All coordinator handles dropped, stopping coordinator.");
                        break;
                    }
                },
            }
        }

        // Dropping the state drops the current worker's link, which aborts it.
        debug!(worker_id = %self.current.id(), "Coordinator stopped.");
        Ok(())
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Submit { body, distance } => {
                self.telemetry.requests_total.increment(1);

                let request = DropRequest {
                    reply_to: self.replies.clone(),
                    body,
                    distance,
                };
                if self.current.send(request).is_err() {
                    debug!(worker_id = %self.current.id(), "Worker is gone, request dropped.");
                }
            }
            Message::Reply(reply) => {
                self.telemetry.replies_total.increment(1);

                if self.reports.send(reply.into_report()).is_err() {
                    debug!("Report sink is gone, report dropped.");
                }
            }
            Message::Exit(signal) => self.handle_exit(signal),
        }
    }

    fn handle_exit(&mut self, signal: ExitSignal) {
        if signal.process_id() != self.current.id() {
            self.telemetry.stale_exit_signals_total.increment(1);
            debug!(worker_id = %signal.process_id(), reason = %signal.reason(), "Ignoring exit signal from stale worker.");
            return;
        }

        warn!(worker_name = %signal.process_name(), worker_id = %signal.process_id(), reason = %signal.reason(), "Worker terminated, restarting.");

        let replacement = self
            .worker
            .clone()
            .spawn(Process::named(self.worker_name.clone()), self.exits.clone());
        self.current = replacement;
        self.restarts += 1;
        self.telemetry.worker_restarts_total.increment(1);

        debug!(worker_id = %self.current.id(), restarts = self.restarts, "Worker restarted.");
        self.status.send_replace(CoordinatorStatus {
            current_worker: self.current.id(),
            restarts: self.restarts,
        });
    }
}

/// Handle for submitting requests to a running [`Coordinator`].
///
/// Handles are cheap to clone. The coordinator stops once the last one is dropped.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    inbox: Address<Message>,
    status: watch::Receiver<CoordinatorStatus>,
}

impl CoordinatorHandle {
    /// Returns the identifier of the coordinator process.
    pub fn process_id(&self) -> Id {
        self.inbox.process_id()
    }

    /// Submits a request.
    ///
    /// This is fire-and-forget: a successful submission only means the coordinator accepted the request. The report,
    /// if any, is delivered to the sink given when the coordinator was created.
    ///
    /// # Errors
    ///
    /// If the coordinator has stopped, an error is returned.
    pub fn submit<S: Into<String>>(&self, body: S, distance: f64) -> Result<(), CoordinatorError> {
        self.inbox
            .send(Message::Submit {
                body: body.into(),
                distance,
            })
            .context(Stopped)
    }

    /// Returns the latest supervision status.
    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Waits until the worker has been restarted at least `restarts` times, returning the status at that point.
    ///
    /// # Errors
    ///
    /// If the coordinator stops first, an error is returned.
    pub async fn wait_for_restarts(&self, restarts: u64) -> Result<CoordinatorStatus, CoordinatorError> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|status| status.restarts >= restarts)
            .await
            .map_err(|_| CoordinatorError::StatusClosed)?;
        Ok(snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        fall::MPS_TO_MPH,
        runtime::{spawn_linked, ExitReason},
    };

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_coordinator(
        shutdown: ProcessShutdown,
    ) -> (
        CoordinatorHandle,
        JoinHandle<Result<(), GenericError>>,
        mpsc::UnboundedReceiver<DropReport>,
    ) {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let reports = Address::from_sender(Id::new(), reports_tx);
        let coordinator = Coordinator::new("coordinator", Arc::new(GravityTable::default()), reports).unwrap();
        let (handle, join_handle) = coordinator.spawn(shutdown);
        (handle, join_handle, reports_rx)
    }

    async fn next_report(reports: &mut mpsc::UnboundedReceiver<DropReport>) -> DropReport {
        timeout(WAIT, reports.recv()).await.unwrap().unwrap()
    }

    fn assert_velocity(report: &DropReport, body: &str, mps: f64) {
        assert_eq!(report.body, body);
        let actual = report.velocity_mph / MPS_TO_MPH;
        assert!((actual - mps).abs() < 1e-3, "expected ~{} m/s, got {} m/s", mps, actual);
    }

    #[test]
    fn invalid_name_is_rejected() {
        let (reports_tx, _reports_rx) = mpsc::unbounded_channel();
        let reports = Address::from_sender(Id::new(), reports_tx);
        let result = Coordinator::new("", Arc::new(GravityTable::default()), reports);
        assert!(matches!(result, Err(CoordinatorError::InvalidName { .. })));
    }

    #[tokio::test]
    async fn forwards_reports_in_request_order() {
        let (handle, _join, mut reports) = spawn_coordinator(ProcessShutdown::noop());

        handle.submit("earth", 20.0).unwrap();
        handle.submit("moon", 20.0).unwrap();

        let first = next_report(&mut reports).await;
        assert_velocity(&first, "earth", 19.799);
        assert!((first.velocity_mph - 44.289).abs() < 1e-3);
        assert_eq!(first.distance, 20.0);

        let second = next_report(&mut reports).await;
        assert_velocity(&second, "moon", 8.0);
    }

    #[tokio::test]
    async fn back_to_back_requests_keep_their_order() {
        let (handle, _join, mut reports) = spawn_coordinator(ProcessShutdown::noop());

        for distance in 1..=50 {
            handle.submit("mars", distance as f64).unwrap();
        }

        for distance in 1..=50 {
            let report = next_report(&mut reports).await;
            assert_eq!(report.distance, distance as f64);
        }
    }

    #[tokio::test]
    async fn restarts_worker_after_negative_distance() {
        let (handle, join, mut reports) = spawn_coordinator(ProcessShutdown::noop());
        let initial = handle.status();
        assert_eq!(initial.restarts, 0);

        handle.submit("earth", -5.0).unwrap();
        let status = timeout(WAIT, handle.wait_for_restarts(1)).await.unwrap().unwrap();
        assert_ne!(status.current_worker, initial.current_worker);

        handle.submit("mars", 10.0).unwrap();
        let report = next_report(&mut reports).await;
        assert_velocity(&report, "mars", 8.614);

        // Exactly one failure was observed, and the coordinator itself is untouched.
        assert_eq!(handle.status().restarts, 1);
        assert!(!join.is_finished());
    }

    #[tokio::test]
    async fn restarts_worker_after_unknown_body() {
        let (handle, _join, mut reports) = spawn_coordinator(ProcessShutdown::noop());

        handle.submit("earth", 20.0).unwrap();
        let delivered = next_report(&mut reports).await;

        handle.submit("pluto", 20.0).unwrap();
        timeout(WAIT, handle.wait_for_restarts(1)).await.unwrap().unwrap();

        handle.submit("moon", 20.0).unwrap();
        let report = next_report(&mut reports).await;
        assert_velocity(&report, "moon", 8.0);
        assert_velocity(&delivered, "earth", 19.799);
    }

    async fn panic_on_first_request(mut requests: mpsc::UnboundedReceiver<DropRequest>) -> Result<(), GenericError> {
        if requests.recv().await.is_some() {
            panic!("worker hit an unrecoverable error");
        }
        Ok(())
    }

    #[tokio::test]
    async fn restarts_worker_after_panic() {
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let reports_address = Address::from_sender(Id::new(), reports_tx);
        let coordinator = Coordinator::new("coordinator", Arc::new(GravityTable::default()), reports_address).unwrap();

        let (handle, join) = coordinator.spawn_with_initial_worker(ProcessShutdown::noop(), |process, exits| {
            let (requests_tx, requests_rx) = mpsc::unbounded_channel();
            let requests = Address::from_sender(process.id(), requests_tx);
            let link = spawn_linked(process, panic_on_first_request(requests_rx), exits);
            WorkerHandle::from_parts(requests, link)
        });
        let initial = handle.status();

        handle.submit("earth", 20.0).unwrap();
        let status = timeout(WAIT, handle.wait_for_restarts(1)).await.unwrap().unwrap();
        assert_ne!(status.current_worker, initial.current_worker);

        // The replacement is a regular worker.
        handle.submit("earth", 20.0).unwrap();
        let report = next_report(&mut reports).await;
        assert_velocity(&report, "earth", 19.799);
        assert_eq!(handle.status().restarts, 1);
        assert!(!join.is_finished());
    }

    #[tokio::test]
    async fn survives_repeated_crashes() {
        let (handle, join, mut reports) = spawn_coordinator(ProcessShutdown::noop());
        let mut seen_workers = vec![handle.status().current_worker];

        for restarts in 1..=10 {
            handle.submit("earth", -1.0).unwrap();
            let status = timeout(WAIT, handle.wait_for_restarts(restarts)).await.unwrap().unwrap();
            assert!(!seen_workers.contains(&status.current_worker));
            seen_workers.push(status.current_worker);
        }

        handle.submit("earth", 20.0).unwrap();
        let report = next_report(&mut reports).await;
        assert_velocity(&report, "earth", 19.799);
        assert_eq!(handle.status().restarts, 10);
        assert!(!join.is_finished());
    }

    #[tokio::test]
    async fn stale_exit_signals_are_ignored() {
        let (handle, _join, mut reports) = spawn_coordinator(ProcessShutdown::noop());
        let before = handle.status();

        let stale = ExitSignal::new(
            Id::new(),
            Name::scoped(&Name::root("coordinator").unwrap(), "worker").unwrap(),
            ExitReason::Panicked,
        );
        handle.inbox.send(Message::Exit(stale)).unwrap();

        // The inbox is processed in order, so once this report arrives the stale signal has been handled.
        handle.submit("earth", 20.0).unwrap();
        next_report(&mut reports).await;

        assert_eq!(handle.status(), before);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (shutdown, shutdown_handle) = ProcessShutdown::paired();
        let (handle, join, _reports) = spawn_coordinator(shutdown);

        shutdown_handle.trigger();
        let result = timeout(WAIT, join).await.unwrap().unwrap();
        assert!(result.is_ok());

        assert!(matches!(handle.submit("earth", 1.0), Err(CoordinatorError::Stopped { .. })));
        assert!(matches!(
            handle.wait_for_restarts(1).await,
            Err(CoordinatorError::StatusClosed)
        ));
    }

    #[tokio::test]
    async fn stops_when_all_handles_are_dropped() {
        let (handle, join, _reports) = spawn_coordinator(ProcessShutdown::noop());
        let other = handle.clone();

        drop(handle);
        other.submit("earth", 1.0).unwrap();
        drop(other);

        let result = timeout(WAIT, join).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn subscribers_observe_restarts() {
        let (handle, _join, _reports) = spawn_coordinator(ProcessShutdown::noop());
        let mut status = handle.subscribe();

        handle.submit("mars", f64::NAN).unwrap();
        timeout(WAIT, status.changed()).await.unwrap().unwrap();
        assert_eq!(status.borrow().restarts, 1);
    }
}
