//! Supervised fall velocity computation.
//!
//! A [`Coordinator`] owns exactly one [`DropWorker`] at a time. It forwards requests to the worker, converts the replies
//! to miles per hour for the report sink, and restarts the worker whenever the worker's exit signal arrives.
//!
//! ```text
//!   CoordinatorHandle::submit ──► Coordinator ──► DropWorker
//!                                     ▲  │            │
//!                     DropReply/Exit  └──┼────────────┘
//!                                        ▼
//!                                   report sink
//! ```

mod coordinator;
pub use self::coordinator::{Coordinator, CoordinatorError, CoordinatorHandle, CoordinatorStatus};

mod gravity;
pub use self::gravity::{DropError, GravityTable, MPS_TO_MPH};

mod messages;
pub use self::messages::{DropReply, DropReport, DropRequest};

mod worker;
pub use self::worker::{DropWorker, WorkerHandle};
