//! Smoke test core
//!
//! Runs a fixed battery of independent probes against external dependencies
//! and folds every probe's sub-steps into a single pass/fail result tree.
//!
//! # Building blocks
//! - [`TestResult`]: one node of the result tree (leaf = step, node = probe)
//! - [`StepLog`]: executes named steps and records one leaf per step
//! - [`aggregate`]: folds a list of results into a parent node
//! - [`wait::ReadinessWaiter`]: polls an orchestrated resource until it
//!   reaches a target condition, a deadline, or cancellation
//! - [`Harness`]: owns the probe set and runs it, isolating failures

pub mod error;
pub mod harness;
pub mod probe;
pub mod result;
pub mod step;
pub mod wait;

pub use error::{PublishError, StepFailure, WaitError};
pub use harness::{Harness, HarnessOptions};
pub use probe::{NoopPublisher, Probe, Publisher};
pub use result::{aggregate, TestResult};
pub use step::StepLog;
