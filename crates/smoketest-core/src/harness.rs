//! Harness
//!
//! Owns the ordered probe set and runs it sequentially. Each probe is
//! isolated: a probe that panics or overruns its timeout becomes a failed
//! node and the run continues with the next probe.
//!
//! An overrun probe is not dropped on the spot. Its cancellation token is
//! fired and the harness keeps polling it for [`HarnessOptions::cleanup_grace`]
//! so resources it created can still be removed.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::probe::{Probe, Publisher};
use crate::result::{aggregate, TestResult};

/// Default time a cancelled probe gets to clean up
pub const CLEANUP_GRACE: Duration = Duration::from_secs(60);

/// Harness options
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Upper bound on a single probe run; `None` lets probes run unbounded
    pub probe_timeout: Option<Duration>,
    /// How long a probe may keep running after it was cancelled
    pub cleanup_grace: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            probe_timeout: None,
            cleanup_grace: CLEANUP_GRACE,
        }
    }
}

/// Runs the configured probe battery
pub struct Harness {
    probes: Vec<Box<dyn Probe>>,
    options: HarnessOptions,
    cancel: CancellationToken,
}

impl Harness {
    /// Create a harness over `probes`, run in the given order
    pub fn new(probes: Vec<Box<dyn Probe>>) -> Self {
        Self::with_options(probes, HarnessOptions::default())
    }

    pub fn with_options(probes: Vec<Box<dyn Probe>>, options: HarnessOptions) -> Self {
        Self {
            probes,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel every probe run when `token` fires, e.g. on shutdown
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Keys of the configured probes, in run order
    pub fn probe_keys(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.key()).collect()
    }

    /// Run every probe once, one after another
    pub async fn run(&self) -> Vec<TestResult> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.probes.len());

        for probe in &self.probes {
            results.push(self.run_probe(probe.as_ref()).await);
        }

        let failed = results.iter().filter(|r| !r.is_passed()).count();
        info!(
            probes = results.len(),
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "smoke test run finished"
        );
        results
    }

    /// Run every probe, then hand the results to `publisher`.
    ///
    /// Publish failures are logged and never change the returned results.
    pub async fn run_and_publish(&self, publisher: &dyn Publisher) -> Vec<TestResult> {
        let results = self.run().await;
        if let Err(e) = publisher.publish(&results).await {
            error!(error = %e, "Unable to publish results to dashboard");
        }
        results
    }

    async fn run_probe(&self, probe: &dyn Probe) -> TestResult {
        let key = probe.key();
        let name = probe.name();
        let start = Instant::now();
        info!(probe = %key, "running probe");

        let cancel = self.cancel.child_token();
        let mut guarded = pin!(AssertUnwindSafe(probe.run_cancellable(&cancel)).catch_unwind());
        let outcome = match self.options.probe_timeout {
            Some(limit) => match timeout(limit, guarded.as_mut()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(probe = %key, timeout_ms = limit.as_millis() as u64, "probe timed out, cancelling");
                    cancel.cancel();
                    let message = format!("Probe timed out after {}s", limit.as_secs_f64());

                    return match timeout(self.options.cleanup_grace, guarded.as_mut()).await {
                        // Keep what the probe recorded, cleanup steps included
                        Ok(Ok(partial)) if !partial.is_leaf() => {
                            let mut children = partial.children().to_vec();
                            children.push(TestResult::failed("Time limit", message));
                            aggregate(key, name, children)
                        }
                        Ok(Ok(_)) => TestResult::failed(name, message).with_key(key),
                        Ok(Err(panic)) => {
                            let panic = panic_message(panic.as_ref());
                            error!(probe = %key, panic = %panic, "probe panicked after cancellation");
                            TestResult::failed(name, message).with_key(key)
                        }
                        Err(_) => {
                            error!(
                                probe = %key,
                                grace_ms = self.options.cleanup_grace.as_millis() as u64,
                                "probe ignored cancellation, abandoning it"
                            );
                            TestResult::failed(name, message).with_key(key)
                        }
                    };
                }
            },
            None => guarded.await,
        };

        match outcome {
            Ok(result) => {
                info!(
                    probe = %key,
                    passed = result.is_passed(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "probe finished"
                );
                result
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(probe = %key, panic = %message, "probe panicked");
                TestResult::failed(name, format!("Probe panicked: {}", message)).with_key(key)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::result::aggregate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct StaticProbe {
        key: &'static str,
        passed: bool,
    }

    #[async_trait]
    impl Probe for StaticProbe {
        fn key(&self) -> &str {
            self.key
        }

        fn name(&self) -> &str {
            self.key
        }

        async fn run(&self) -> TestResult {
            let leaf = if self.passed {
                TestResult::passed("Step")
            } else {
                TestResult::failed("Step", "boom")
            };
            aggregate(self.key, self.key, vec![leaf])
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        fn key(&self) -> &str {
            "panics"
        }

        fn name(&self) -> &str {
            "Panics"
        }

        async fn run(&self) -> TestResult {
            panic!("driver exploded")
        }
    }

    struct SlowProbe;

    #[async_trait]
    impl Probe for SlowProbe {
        fn key(&self) -> &str {
            "slow"
        }

        fn name(&self) -> &str {
            "Slow"
        }

        async fn run(&self) -> TestResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            aggregate("slow", "Slow", Vec::new())
        }
    }

    /// Holds a resource until cancelled, then releases it
    #[derive(Default)]
    struct HoldingProbe {
        released: AtomicBool,
    }

    #[async_trait]
    impl Probe for HoldingProbe {
        fn key(&self) -> &str {
            "holding"
        }

        fn name(&self) -> &str {
            "Holding"
        }

        async fn run(&self) -> TestResult {
            self.run_cancellable(&CancellationToken::new()).await
        }

        async fn run_cancellable(&self, cancel: &CancellationToken) -> TestResult {
            let mut steps = vec![TestResult::passed("Acquire")];
            tokio::select! {
                _ = cancel.cancelled() => steps.push(TestResult::failed("Use", "cancelled")),
                _ = tokio::time::sleep(Duration::from_secs(3600)) => steps.push(TestResult::passed("Use")),
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.released.store(true, Ordering::SeqCst);
            steps.push(TestResult::passed("Release"));
            aggregate("holding", "Holding", steps)
        }
    }

    struct SharedProbe(Arc<HoldingProbe>);

    #[async_trait]
    impl Probe for SharedProbe {
        fn key(&self) -> &str {
            self.0.key()
        }

        fn name(&self) -> &str {
            self.0.name()
        }

        async fn run(&self) -> TestResult {
            self.0.run().await
        }

        async fn run_cancellable(&self, cancel: &CancellationToken) -> TestResult {
            self.0.run_cancellable(cancel).await
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        seen: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, results: &[TestResult]) -> Result<(), PublishError> {
            self.seen.lock().unwrap().push(results.len());
            if self.fail {
                Err(PublishError::UnexpectedStatus(500))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_runs_probes_in_order() {
        let harness = Harness::new(vec![
            Box::new(StaticProbe { key: "me", passed: true }),
            Box::new(StaticProbe { key: "redis", passed: false }),
            Box::new(StaticProbe { key: "nfs", passed: true }),
        ]);

        let results = harness.run().await;
        let keys: Vec<_> = results.iter().map(|r| r.key().unwrap()).collect();
        assert_eq!(keys, vec!["me", "redis", "nfs"]);
        assert!(results[0].is_passed());
        assert!(!results[1].is_passed());
        assert!(results[2].is_passed());
    }

    #[tokio::test]
    async fn test_panicking_probe_is_isolated() {
        let harness = Harness::new(vec![
            Box::new(PanickingProbe),
            Box::new(StaticProbe { key: "me", passed: true }),
        ]);

        let results = harness.run().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key(), Some("panics"));
        assert!(!results[0].is_passed());
        assert!(results[0].error().unwrap().contains("driver exploded"));
        assert!(results[1].is_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_reported() {
        let harness = Harness::with_options(
            vec![
                Box::new(SlowProbe),
                Box::new(StaticProbe { key: "me", passed: true }),
            ],
            HarnessOptions {
                probe_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        );

        let results = harness.run().await;
        assert_eq!(results[0].key(), Some("slow"));
        assert!(!results[0].is_passed());
        assert!(results[0].error().unwrap().contains("timed out"));
        assert!(results[1].is_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_run_gets_to_clean_up() {
        let holding = Arc::new(HoldingProbe::default());
        let harness = Harness::with_options(
            vec![
                Box::new(SharedProbe(holding.clone())),
                Box::new(StaticProbe { key: "me", passed: true }),
            ],
            HarnessOptions {
                probe_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        );

        let start = tokio::time::Instant::now();
        let results = harness.run().await;

        assert!(holding.released.load(Ordering::SeqCst));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(results[0].key(), Some("holding"));
        assert!(!results[0].is_passed());
        assert_eq!(results[0].child_names(), vec!["Acquire", "Use", "Release", "Time limit"]);
        assert!(results[0].child("Release").unwrap().is_passed());
        assert!(results[0].child("Time limit").unwrap().error().unwrap().contains("timed out after 5s"));
        assert!(results[1].is_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ignoring_cancellation_is_abandoned_after_grace() {
        let harness = Harness::with_options(
            vec![Box::new(SlowProbe)],
            HarnessOptions {
                probe_timeout: Some(Duration::from_secs(5)),
                cleanup_grace: Duration::from_secs(10),
            },
        );

        let start = tokio::time::Instant::now();
        let results = harness.run().await;

        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert!(results[0].is_leaf());
        assert!(results[0].error().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_token_cancels_running_battery() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let holding = Arc::new(HoldingProbe::default());
        let harness = Harness::new(vec![Box::new(SharedProbe(holding.clone()))]).with_cancellation(shutdown);

        let results = harness.run().await;

        assert!(holding.released.load(Ordering::SeqCst));
        assert_eq!(results[0].child("Use").unwrap().error(), Some("cancelled"));
        assert!(results[0].child("Time limit").is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_change_results() {
        let harness = Harness::new(vec![Box::new(StaticProbe { key: "me", passed: true })]);
        let publisher = RecordingPublisher {
            fail: true,
            ..Default::default()
        };

        let results = harness.run_and_publish(&publisher).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_passed());
        assert_eq!(*publisher.seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_empty_harness() {
        let harness = Harness::new(Vec::new());
        assert!(harness.probe_keys().is_empty());
        assert!(harness.run().await.is_empty());
    }
}
