//! Job queue and dispatch

pub mod dispatcher;
pub mod jobs;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use jobs::{CheckedOutUnit, JobQueue, UnitOutcome};
