//! Step runner
//!
//! A probe is a script of named steps. [`StepLog`] runs each step, appends
//! exactly one leaf per step, and hands the produced value back so the probe
//! can decide whether to continue:
//!
//! ```rust,ignore
//! let mut steps = StepLog::new();
//! let Some(conn) = steps.run("Open connection", connect()).await else {
//!     return steps.finish(KEY, NAME);
//! };
//! ```

use std::future::Future;

use crate::error::StepFailure;
use crate::result::{aggregate, TestResult};

/// Accumulates the leaves of one probe run, in execution order
#[derive(Debug, Default)]
pub struct StepLog {
    results: Vec<TestResult>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an async step and record its outcome.
    ///
    /// Returns `Some(value)` when the step succeeded and `None` when it
    /// failed; either way exactly one leaf named `label` is appended.
    pub async fn run<T, F>(&mut self, label: &str, step: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let outcome = step.await;
        self.settle(label, outcome)
    }

    /// Run a synchronous step and record its outcome
    pub fn run_sync<T, F>(&mut self, label: &str, step: F) -> Option<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        let outcome = step();
        self.settle(label, outcome)
    }

    /// Record a failure that did not come from running a step
    pub fn fail(&mut self, label: &str, error: impl Into<String>) {
        self.results.push(TestResult::failed(label, non_empty(error.into())));
    }

    /// Append a prebuilt result, e.g. one reported by a listener task
    pub fn record(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<TestResult> {
        self.results
    }

    /// Aggregate the recorded steps into the probe's node
    pub fn finish(self, key: impl Into<String>, name: impl Into<String>) -> TestResult {
        aggregate(key, name, self.results)
    }

    fn settle<T>(&mut self, label: &str, outcome: anyhow::Result<T>) -> Option<T> {
        match outcome {
            Ok(value) => {
                tracing::debug!(step = label, "step passed");
                self.results.push(TestResult::passed(label));
                Some(value)
            }
            Err(err) => {
                tracing::warn!(step = label, error = %format!("{:#}", err), "step failed");
                self.results.push(failure_leaf(label, &err));
                None
            }
        }
    }
}

/// Build the failed leaf for `err`, lifting detail and status code out of a
/// [`StepFailure`] anywhere in the chain.
pub fn failure_leaf(label: &str, err: &anyhow::Error) -> TestResult {
    let failure = err.chain().find_map(|e| e.downcast_ref::<StepFailure>());

    let message = match failure {
        // Keep the bare error code when the step produced one
        Some(f) if err.chain().count() == 1 => f.message.clone(),
        _ => format!("{:#}", err),
    };
    let mut leaf = TestResult::failed(label, non_empty(message));

    if let Some(f) = failure {
        if let Some(detail) = &f.detail {
            leaf = leaf.with_error_detail(detail.clone());
        }
        if let Some(code) = f.status_code {
            leaf = leaf.with_status_code(code);
        }
    }
    leaf
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "unknown error".to_string()
    } else {
        message
    }
}
