//! Runtime system.
//!
//! This module contains the process primitives everything else is built from. It borrows its vocabulary from
//! [Erlang/OTP](https://www.erlang.org/doc/system/design_principles.html): independent processes that only talk to each
//! other through messages, and links that turn the death of one process into a message for another.
//!
//! # Processes
//!
//! A process is a future running as an independent Tokio task. Every process has a unique numerical [`Id`] and a
//! semi-unique, dotted [`Name`], both of which are attached to a tracing span wrapping the process future.
//!
//! Processes do not share mutable state. Each one owns an inbox (an unbounded `mpsc` channel) and hands out
//! [`Address`]es for it. Messages from one sender arrive in the order they were sent; there is no ordering between
//! different senders.
//!
//! # Links
//!
//! [`spawn_linked`] starts a child process and ties its lifetime to the caller in both directions. When the child
//! terminates, normally or not, an [`ExitSignal`] describing why is delivered to the caller's inbox like any other
//! message, instead of the failure propagating. When the caller drops the returned [`LinkedProcess`], the child is
//! aborted.
//!
//! A caller that traps these signals can decide what to do about the failure. The coordinator in
//! [`fall`][crate::fall] always replaces its worker.
//!
//! # Registry
//!
//! A [`Registry`] maps logical names to handles so processes can be found without passing their address around.

mod address;
pub use self::address::{Address, SendError};

mod link;
pub use self::link::{spawn_linked, ExitReason, ExitSignal, LinkedProcess};

mod process;
pub use self::process::{Id, InstrumentedProcess, Name, Process, ProcessExt};

mod registry;
pub use self::registry::{Registry, RegistryError};

mod shutdown;
pub use self::shutdown::{ProcessShutdown, ShutdownHandle};
