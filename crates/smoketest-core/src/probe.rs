//! Probe and publisher capabilities

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PublishError;
use crate::result::TestResult;

/// A self-contained check against one external dependency.
///
/// Probes are built once per harness (binding discovery happens in the
/// constructor) and own every connection they open for the duration of
/// [`Probe::run`]. A dependency that is not provisioned should not produce a
/// probe at all; registries skip it instead of reporting a failure.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable key of the probe's node in the result tree, e.g. `mySQL`
    fn key(&self) -> &str;

    /// Human readable name
    fn name(&self) -> &str;

    /// Run every step and return the probe's node.
    ///
    /// Must not fail: step failures end up as failed leaves.
    async fn run(&self) -> TestResult;

    /// Run until done or until `cancel` fires.
    ///
    /// The harness cancels the token when the probe overruns its time limit
    /// and keeps polling for a grace period. Probes that create external
    /// resources override this to stop waiting and still clean up; the
    /// default ignores the token.
    async fn run_cancellable(&self, cancel: &CancellationToken) -> TestResult {
        let _ = cancel;
        self.run().await
    }
}

/// Receives the result tree of every run
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, results: &[TestResult]) -> Result<(), PublishError>;
}

/// Publisher that drops everything, for runs without a dashboard
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _results: &[TestResult]) -> Result<(), PublishError> {
        Ok(())
    }
}
