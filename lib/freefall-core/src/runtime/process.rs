use std::{
    fmt,
    future::Future,
    ops::Deref,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
    task::{Context, Poll},
};

use pin_project::pin_project;
use tracing::{info_span, instrument::Instrumented, Instrument as _};

static GLOBAL_PROCESS_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Process identifier.
///
/// A simple, numeric identifier that uniquely identifies a process for the lifetime of the program. Identifiers are
/// never reused, so a replacement process always has a different identifier than the process it replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(usize);

impl Id {
    /// Creates a new process identifier.
    pub fn new() -> Self {
        let id = GLOBAL_PROCESS_ID_COUNTER.fetch_add(1, Relaxed);
        Self(id)
    }

    /// Returns the numeric value of this identifier.
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// Process name.
///
/// A human-readable name for a process that only contains alphanumeric characters, underscores, and periods.
///
/// Process names are scoped: a worker named `worker` started by a coordinator named `coordinator` ends up as
/// `coordinator.worker`. Invalid characters, such as hyphens or spaces, are replaced with underscores.
///
/// Not guaranteed to be unique.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Name(Arc<str>);

impl Name {
    /// Creates a top-level name.
    ///
    /// Returns `None` if the name is empty, or is empty after sanitization.
    pub fn root<N: AsRef<str>>(name: N) -> Option<Self> {
        let sanitized = get_sanitized_name(name.as_ref());
        if sanitized.is_empty() {
            return None;
        }

        Some(Self(sanitized))
    }

    /// Creates a name nested under `parent`.
    ///
    /// Returns `None` if the name is empty, or is empty after sanitization.
    pub fn scoped<N: AsRef<str>>(parent: &Name, name: N) -> Option<Self> {
        let sanitized = get_sanitized_name(name.as_ref());
        if sanitized.is_empty() {
            return None;
        }

        Some(Self(format!("{}.{}", parent.0, sanitized).into()))
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A runtime process.
///
/// Pairs a fresh [`Id`] with a [`Name`]. Every process future is run wrapped in a span carrying both, so anything
/// logged from inside a process can be traced back to it.
#[derive(Clone, Debug)]
pub struct Process {
    id: Id,
    name: Name,
}

impl Process {
    /// Creates a top-level process.
    ///
    /// Returns `None` if the name is invalid.
    pub fn root<N: AsRef<str>>(name: N) -> Option<Self> {
        Name::root(name).map(Self::named)
    }

    /// Creates a process whose name is scoped under `parent`.
    ///
    /// Returns `None` if the name is invalid.
    pub fn child<N: AsRef<str>>(name: N, parent: &Process) -> Option<Self> {
        Name::scoped(&parent.name, name).map(Self::named)
    }

    /// Creates a process with an already validated name.
    ///
    /// Every call yields a distinct process: restarting something under the same name still gets it a fresh [`Id`].
    pub fn named(name: Name) -> Self {
        Self { id: Id::new(), name }
    }

    /// Returns the process identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the process name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Wraps `inner` so that it runs inside this process's span.
    pub fn into_instrumented<F>(self, inner: F) -> InstrumentedProcess<F>
    where
        F: Future,
    {
        InstrumentedProcess::new(self, inner)
    }
}

/// An instrumented process.
#[pin_project]
pub struct InstrumentedProcess<F> {
    #[pin]
    inner: Instrumented<F>,
}

impl<F> InstrumentedProcess<F>
where
    F: Future,
{
    pub(crate) fn new(process: Process, inner: F) -> Self {
        let span = info_span!(
            "process",
            process_id = process.id().as_usize(),
            process_name = &*process.name,
        );

        Self {
            inner: inner.instrument(span),
        }
    }
}

impl<F> Future for InstrumentedProcess<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

/// Helper trait for running process futures with instrumentation.
pub trait ProcessExt {
    /// Converts the process future into an instrumented future.
    fn into_instrumented(self, process: Process) -> InstrumentedProcess<Self>
    where
        Self: Future + Sized;
}

impl<F> ProcessExt for F
where
    F: Future,
{
    fn into_instrumented(self, process: Process) -> InstrumentedProcess<Self>
    where
        Self: Future + Sized,
    {
        process.into_instrumented(self)
    }
}

fn is_process_name_segment_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // Segments start and end with alphanumerics, and otherwise only hold alphanumerics and underscores. Periods only
    // ever appear as separators between segments.
    if !name.starts_with(|c: char| c.is_alphanumeric()) || !name.ends_with(|c: char| c.is_alphanumeric()) {
        return false;
    }

    name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn get_sanitized_name(name: &str) -> Arc<str> {
    if is_process_name_segment_valid(name) {
        return name.into();
    }

    // Replace invalid characters with underscores, collapsing runs of them into a single one.
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_underscore = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            sanitized.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            sanitized.push('_');
            last_was_underscore = true;
        }
    }

    Arc::from(sanitized.trim_matches(|c: char| !c.is_alphanumeric()))
}
