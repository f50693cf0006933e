//! Integration tests for the smoke test core

use async_trait::async_trait;
use smoketest_core::wait::{BackoffConfig, PodState, ReadinessWaiter, StateSource, WaitSpec, WorkloadState};
use smoketest_core::{Harness, HarnessOptions, Probe, StepLog, TestResult};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Workload whose ready count climbs by one every poll
struct RollingWorkload {
    ready: AtomicI32,
    polls: AtomicU32,
}

impl RollingWorkload {
    fn new() -> Self {
        Self {
            ready: AtomicI32::new(0),
            polls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StateSource for RollingWorkload {
    async fn workload_state(&self, _name: &str) -> anyhow::Result<WorkloadState> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let ready_replicas = self.ready.fetch_add(1, Ordering::SeqCst);
        Ok(WorkloadState { ready_replicas })
    }

    async fn pod_state(&self, _name: &str) -> anyhow::Result<PodState> {
        anyhow::bail!("pods are not used here")
    }
}

/// Probe that creates a workload, waits for it, and cleans up
struct RolloutProbe {
    source: Arc<RollingWorkload>,
    target: i32,
    deadline: Duration,
}

#[async_trait]
impl Probe for RolloutProbe {
    fn key(&self) -> &str {
        "rollout"
    }

    fn name(&self) -> &str {
        "Rollout"
    }

    async fn run(&self) -> TestResult {
        self.run_cancellable(&CancellationToken::new()).await
    }

    async fn run_cancellable(&self, cancel: &CancellationToken) -> TestResult {
        let mut steps = StepLog::new();
        steps.run_sync("Create deployment", || Ok(()));

        let spec = WaitSpec::deployment("smoketest", self.target, self.deadline).with_backoff(
            BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(40)),
        );
        let waiter = ReadinessWaiter::new(self.source.as_ref());
        let ready = steps
            .run("Wait for deployment", async {
                waiter.wait(&spec, cancel).await.map_err(anyhow::Error::from)
            })
            .await;

        if ready.is_some() {
            steps.run_sync("Test connection", || Ok(()));
        }
        steps.run_sync("Delete deployment", || Ok(()));
        steps.finish(self.key(), self.name())
    }
}

#[tokio::test(start_paused = true)]
async fn test_rollout_probe_passes_when_target_reached() {
    let source = Arc::new(RollingWorkload::new());
    let harness = Harness::new(vec![Box::new(RolloutProbe {
        source: source.clone(),
        target: 3,
        deadline: Duration::from_secs(10),
    })]);

    let results = harness.run().await;
    assert_eq!(results.len(), 1);
    let node = &results[0];
    assert!(node.is_passed());
    assert_eq!(
        node.child_names(),
        vec!["Create deployment", "Wait for deployment", "Test connection", "Delete deployment"]
    );
    assert_eq!(source.polls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_rollout_probe_reports_deadline_and_still_cleans_up() {
    let source = Arc::new(RollingWorkload::new());
    let harness = Harness::new(vec![Box::new(RolloutProbe {
        source,
        target: 1_000_000,
        deadline: Duration::from_millis(200),
    })]);

    let results = harness.run().await;
    let node = &results[0];
    assert!(!node.is_passed());
    assert_eq!(
        node.child_names(),
        vec!["Create deployment", "Wait for deployment", "Delete deployment"]
    );
    let wait = node.child("Wait for deployment").unwrap();
    assert!(wait.error().unwrap().contains("deadline"));
    assert!(node.child("Delete deployment").unwrap().is_passed());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_token_fails_the_wait_step() {
    let source = Arc::new(RollingWorkload::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let harness = Harness::with_options(
        vec![Box::new(RolloutProbe {
            source: source.clone(),
            target: 2,
            deadline: Duration::from_secs(10),
        })],
        HarnessOptions {
            probe_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        },
    )
    .with_cancellation(cancel);

    let results = harness.run().await;
    let wait = results[0].child("Wait for deployment").unwrap();
    assert!(!wait.is_passed());
    assert!(wait.error().unwrap().contains("cancelled"));
    assert_eq!(source.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_rollout_still_deletes_deployment() {
    let source = Arc::new(RollingWorkload::new());
    let harness = Harness::with_options(
        vec![Box::new(RolloutProbe {
            source,
            target: 1_000_000,
            deadline: Duration::from_secs(600),
        })],
        HarnessOptions {
            probe_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );

    let results = harness.run().await;
    let node = &results[0];
    assert!(!node.is_passed());
    assert_eq!(
        node.child_names(),
        vec!["Create deployment", "Wait for deployment", "Delete deployment", "Time limit"]
    );
    assert!(node.child("Wait for deployment").unwrap().error().unwrap().contains("cancelled"));
    assert!(node.child("Delete deployment").unwrap().is_passed());
}

#[tokio::test]
async fn test_result_tree_serializes_as_list() {
    let harness = Harness::new(Vec::new());
    let results = harness.run().await;
    assert_eq!(serde_json::to_string(&results).unwrap(), "[]");
}
