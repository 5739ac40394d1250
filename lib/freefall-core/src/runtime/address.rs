use std::{fmt, sync::Arc};

use snafu::Snafu;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};

use super::process::Id;

/// Address errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SendError {
    /// The addressed process is no longer receiving messages.
    #[snafu(display("Process {} is no longer receiving messages.", process_id))]
    Closed {
        /// Identifier of the process that was addressed.
        process_id: Id,
    },
}

type Deliver<M> = Arc<dyn Fn(M) -> bool + Send + Sync>;

/// A cloneable handle for sending messages to a process inbox.
///
/// Delivery is asynchronous and never blocks: messages from a single sender arrive in the order they were sent, while
/// messages from different senders interleave arbitrarily.
///
/// An address can be [mapped][Self::map] to accept a different message type, which is how a process hands out narrow
/// reply addresses (for example, one that only accepts replies) that still land in its single inbox.
pub struct Address<M> {
    process_id: Id,
    deliver: Deliver<M>,
}

impl<M> Address<M>
where
    M: Send + 'static,
{
    /// Creates an address that keeps the inbox open for as long as the address, or any clone of it, is alive.
    pub fn from_sender(process_id: Id, sender: UnboundedSender<M>) -> Self {
        Self {
            process_id,
            deliver: Arc::new(move |message| sender.send(message).is_ok()),
        }
    }

    /// Creates an address that does not keep the inbox open.
    ///
    /// Once every strong sender for the inbox is gone the receiving process observes its inbox as closed, even if weak
    /// addresses are still held elsewhere. Sends through a weak address after that point fail.
    pub fn weak(process_id: Id, sender: &UnboundedSender<M>) -> Self {
        Self::from_weak_sender(process_id, sender.downgrade())
    }

    fn from_weak_sender(process_id: Id, sender: WeakUnboundedSender<M>) -> Self {
        Self {
            process_id,
            deliver: Arc::new(move |message| match sender.upgrade() {
                Some(sender) => sender.send(message).is_ok(),
                None => false,
            }),
        }
    }

    /// Returns the identifier of the process this address delivers to.
    pub fn process_id(&self) -> Id {
        self.process_id
    }

    /// Sends a message to the process.
    ///
    /// # Errors
    ///
    /// If the process is no longer receiving messages, an error is returned and the message is dropped.
    pub fn send(&self, message: M) -> Result<(), SendError> {
        if (self.deliver)(message) {
            Ok(())
        } else {
            Err(SendError::Closed {
                process_id: self.process_id,
            })
        }
    }

    /// Creates an address accepting `N`, converting each message into `M` before delivering it here.
    pub fn map<N, F>(&self, f: F) -> Address<N>
    where
        N: Send + 'static,
        F: Fn(N) -> M + Send + Sync + 'static,
    {
        let deliver = Arc::clone(&self.deliver);
        Address {
            process_id: self.process_id,
            deliver: Arc::new(move |message| deliver(f(message))),
        }
    }
}

impl<M> Clone for Address<M> {
    fn clone(&self) -> Self {
        Self {
            process_id: self.process_id,
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<M> fmt::Debug for Address<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address").field("process_id", &self.process_id).finish()
    }
}
