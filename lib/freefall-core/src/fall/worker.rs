use std::sync::Arc;

use freefall_error::{ErrorContext as _, GenericError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    gravity::{DropError, GravityTable},
    messages::{DropReply, DropRequest},
};
use crate::runtime::{spawn_linked, Address, ExitSignal, Id, LinkedProcess, Process, SendError};

/// Computes fall velocities, one request at a time.
///
/// The worker is stateless apart from its gravity table. It treats a request it cannot compute as a fatal error: the
/// process ends with [`ExitReason::Failed`][crate::runtime::ExitReason::Failed] and whoever linked to it decides what
/// happens next.
#[derive(Clone, Debug)]
pub struct DropWorker {
    gravity: Arc<GravityTable>,
}

impl DropWorker {
    /// Creates a new `DropWorker` using the given gravity table.
    pub fn new(gravity: Arc<GravityTable>) -> Self {
        Self { gravity }
    }

    /// Handles a single request, sending the reply to the requester.
    ///
    /// A requester that has gone away is not an error: the reply is discarded.
    ///
    /// # Errors
    ///
    /// If the body is unknown, or the distance is negative or not finite, an error is returned and no reply is sent.
    pub fn handle(&self, request: DropRequest) -> Result<(), DropError> {
        let DropRequest {
            reply_to,
            body,
            distance,
        } = request;

        let velocity = self.gravity.fall_velocity(&body, distance)?;
        trace!(%body, distance, velocity, "Computed fall velocity.");

        let reply = DropReply {
            body,
            // Only `-0.0` can change here.
            distance: distance.abs(),
            velocity,
        };
        if reply_to.send(reply).is_err() {
            debug!(requester = %reply_to.process_id(), "Requester is gone. Discarding reply.");
        }

        Ok(())
    }

    /// Runs the worker until its inbox closes, or until a request cannot be computed.
    ///
    /// # Errors
    ///
    /// If a request cannot be computed, an error is returned and the worker stops. Requests still queued in the inbox
    /// are dropped along with it.
    pub async fn run(self, mut requests: mpsc::UnboundedReceiver<DropRequest>) -> Result<(), GenericError> {
        debug!("Worker started.");

        while let Some(request) = requests.recv().await {
            let body = request.body.clone();
            let distance = request.distance;
            self.handle(request)
                .with_error_context(|| format!("Failed to compute fall of {} meters on '{}'", distance, body))?;
        }

        debug!("Worker inbox closed. Stopping.");
        Ok(())
    }

    /// Spawns the worker as `process`, linked to `exits`.
    pub fn spawn(self, process: Process, exits: Address<ExitSignal>) -> WorkerHandle {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let requests = Address::from_sender(process.id(), requests_tx);
        let link = spawn_linked(process, self.run(requests_rx), exits);

        WorkerHandle { requests, link }
    }
}

/// Handle to a running, linked worker.
///
/// Holds the only sender for the worker's inbox and the link to the worker process. Dropping the handle aborts the
/// worker.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: Address<DropRequest>,
    link: LinkedProcess,
}

impl WorkerHandle {
    /// Returns the identifier of the worker process.
    pub fn id(&self) -> Id {
        self.link.id()
    }

    /// Forwards a request to the worker.
    ///
    /// # Errors
    ///
    /// If the worker has already terminated, an error is returned and the request is dropped.
    pub fn send(&self, request: DropRequest) -> Result<(), SendError> {
        self.requests.send(request)
    }

    /// Returns `true` if the worker process has terminated.
    pub fn is_finished(&self) -> bool {
        self.link.is_finished()
    }
}

#[cfg(test)]
impl WorkerHandle {
    pub(crate) fn from_parts(requests: Address<DropRequest>, link: LinkedProcess) -> Self {
        Self { requests, link }
    }
}
