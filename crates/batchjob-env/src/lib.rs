//! Activation of named execution environments and execution of job payloads.
//!
//! A job's payload runs inside a named environment (such as a conda
//! environment) that must be activated before the payload starts and
//! released after it terminates. [`activate`] returns a
//! [`ScopedEnvironment`] guard that releases the environment when dropped,
//! and [`run`] runs a payload inside it. [`Launch`] drives the whole
//! sequence for a [`JobRequest`](batchjob_descriptor::JobRequest) and
//! reports lifecycle events to an [`EventSink`].

mod error;
mod lifecycle;
mod registry;
mod run;
mod scope;
#[cfg(test)]
mod test;

pub use error::*;
pub use lifecycle::*;
pub use registry::*;
pub use run::*;
pub use scope::*;
