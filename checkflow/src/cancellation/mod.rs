//! Cooperative cancellation for pipeline invocations.
//!
//! A cancelled invocation leaves the context store exactly as of its last
//! successful `apply`.

mod token;

pub use token::{CancelCallback, CancellationToken};
