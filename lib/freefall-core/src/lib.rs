//! Core primitives for freefall: processes and links, the supervised fall velocity computation, and a message counter.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod counter;
pub mod fall;
pub mod runtime;
