//! Readiness waiter
//!
//! Blocks the calling probe until an orchestrated resource reaches a target
//! condition. The waiter is a small state machine:
//!
//! ```text
//! Polling ──predicate holds──▶ Satisfied
//!    │ ▲
//!    │ └── fetch failed / predicate false (sleep with backoff)
//!    ├──── token cancelled ──▶ Cancelled
//!    └──── deadline reached ─▶ TimedOut
//! (validation) ──────────────▶ Unsupported / InvalidOption  (no poll made)
//! ```
//!
//! Transient fetch errors never end a wait; only the deadline or the
//! cancellation token can stop a satisfiable wait.

mod backoff;

pub use backoff::{Backoff, BackoffConfig};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::WaitError;

/// Container termination reason that marks a completed pod
pub const COMPLETED_REASON: &str = "Completed";

/// Pod phase reported while the pod is running
pub const RUNNING_PHASE: &str = "Running";

/// Kinds of orchestrated resources a caller may ask to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Scalable workload (deployment)
    Deployment,
    /// Single pod
    Pod,
    Namespace,
    StatefulSet,
    PersistentVolumeClaim,
    ConfigMap,
    Secret,
}

impl ResourceKind {
    /// Whether the waiter has a readiness predicate for this kind
    pub fn is_supported(&self) -> bool {
        matches!(self, ResourceKind::Deployment | ResourceKind::Pod)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Pod => "pod",
            ResourceKind::Namespace => "namespace",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::PersistentVolumeClaim => "persistentvolumeclaim",
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Secret => "secret",
        };
        f.write_str(name)
    }
}

/// Lifecycle phase a single-pod wait can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Running,
    Completed,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodPhase::Running => f.write_str("Running"),
            PodPhase::Completed => f.write_str("Completed"),
        }
    }
}

/// Optional wait arguments.
///
/// Which fields apply depends on the resource kind:
/// - deployment: `target_workload_name` and `target_replica_count` are
///   required, the pod fields must be unset
/// - pod: `target_pod_name` is required, `target_phase` defaults to
///   [`PodPhase::Running`], the workload fields must be unset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaitOptions {
    pub target_replica_count: Option<i32>,
    pub target_workload_name: Option<String>,
    pub target_pod_name: Option<String>,
    pub target_phase: Option<PodPhase>,
}

/// Everything one wait call needs
#[derive(Debug, Clone, PartialEq)]
pub struct WaitSpec {
    pub kind: ResourceKind,
    pub options: WaitOptions,
    pub backoff: BackoffConfig,
    /// Upper bound on the whole wait, measured from the call
    pub deadline: Duration,
}

impl WaitSpec {
    /// Wait for `name` to report `replicas` ready replicas
    pub fn deployment(name: impl Into<String>, replicas: i32, deadline: Duration) -> Self {
        Self {
            kind: ResourceKind::Deployment,
            options: WaitOptions {
                target_replica_count: Some(replicas),
                target_workload_name: Some(name.into()),
                ..Default::default()
            },
            backoff: BackoffConfig::default(),
            deadline,
        }
    }

    /// Wait for pod `name` to be running
    pub fn pod(name: impl Into<String>, deadline: Duration) -> Self {
        Self {
            kind: ResourceKind::Pod,
            options: WaitOptions {
                target_pod_name: Some(name.into()),
                ..Default::default()
            },
            backoff: BackoffConfig::default(),
            deadline,
        }
    }

    /// Override the pod phase to wait for
    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.options.target_phase = Some(phase);
        self
    }

    /// Override the poll schedule
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Validate the options and resolve them into the condition to poll for.
    ///
    /// Unsupported kinds are reported before option problems.
    pub fn resolve(&self) -> Result<Condition, WaitError> {
        if !self.kind.is_supported() {
            return Err(WaitError::Unsupported(self.kind));
        }
        self.backoff.validate()?;
        if self.deadline.is_zero() {
            return Err(WaitError::invalid_option("deadline must be greater than zero"));
        }

        let opts = &self.options;
        match self.kind {
            ResourceKind::Deployment => {
                if opts.target_pod_name.is_some() || opts.target_phase.is_some() {
                    return Err(WaitError::invalid_option(
                        "pod name and phase do not apply to a deployment wait",
                    ));
                }
                let name = required_name(opts.target_workload_name.as_deref(), "target workload name")?;
                let replicas = opts.target_replica_count.ok_or_else(|| {
                    WaitError::invalid_option("target replica count is required for a deployment wait")
                })?;
                if replicas < 0 {
                    return Err(WaitError::invalid_option(format!(
                        "target replica count must not be negative, got {}",
                        replicas
                    )));
                }
                Ok(Condition::ReadyReplicas { name, replicas })
            }
            ResourceKind::Pod => {
                if opts.target_replica_count.is_some() || opts.target_workload_name.is_some() {
                    return Err(WaitError::invalid_option(
                        "workload name and replica count do not apply to a pod wait",
                    ));
                }
                let name = required_name(opts.target_pod_name.as_deref(), "target pod name")?;
                Ok(Condition::PodPhase {
                    name,
                    phase: opts.target_phase.unwrap_or_default(),
                })
            }
            other => Err(WaitError::Unsupported(other)),
        }
    }
}

fn required_name(name: Option<&str>, what: &str) -> Result<String, WaitError> {
    match name {
        Some(n) if !n.trim().is_empty() => Ok(n.to_string()),
        Some(_) => Err(WaitError::invalid_option(format!("{} must not be empty", what))),
        None => Err(WaitError::invalid_option(format!("{} is required", what))),
    }
}

/// Resolved condition the waiter polls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    ReadyReplicas { name: String, replicas: i32 },
    PodPhase { name: String, phase: PodPhase },
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::ReadyReplicas { name, replicas } => {
                write!(f, "deployment {} with {} ready replicas", name, replicas)
            }
            Condition::PodPhase { name, phase } => write!(f, "pod {} {}", name, phase),
        }
    }
}

/// Observed state of a scalable workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkloadState {
    pub ready_replicas: i32,
}

/// Observed state of a single pod
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodState {
    /// Reported lifecycle phase, e.g. `Running`
    pub phase: Option<String>,
    /// Termination reason of the pod's first container, if it terminated
    pub terminated_reason: Option<String>,
}

impl Condition {
    fn holds_for_workload(&self, state: &WorkloadState) -> bool {
        match self {
            Condition::ReadyReplicas { replicas, .. } => state.ready_replicas == *replicas,
            Condition::PodPhase { .. } => false,
        }
    }

    fn holds_for_pod(&self, state: &PodState) -> bool {
        match self {
            Condition::PodPhase { phase: PodPhase::Running, .. } => {
                state.phase.as_deref() == Some(RUNNING_PHASE)
            }
            Condition::PodPhase { phase: PodPhase::Completed, .. } => {
                state.terminated_reason.as_deref() == Some(COMPLETED_REASON)
            }
            Condition::ReadyReplicas { .. } => false,
        }
    }
}

/// Source of observed resource state (the orchestration API)
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Current state of the named scalable workload
    async fn workload_state(&self, name: &str) -> anyhow::Result<WorkloadState>;

    /// Current state of the named pod
    async fn pod_state(&self, name: &str) -> anyhow::Result<PodState>;
}

/// Successful wait summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// Number of fetches made, including the satisfying one
    pub polls: u32,
    pub elapsed: Duration,
}

enum Tick {
    Satisfied,
    Pending,
    FetchFailed(String),
}

/// Polls a [`StateSource`] until a [`WaitSpec`] is satisfied
pub struct ReadinessWaiter<'a> {
    source: &'a dyn StateSource,
}

impl<'a> ReadinessWaiter<'a> {
    pub fn new(source: &'a dyn StateSource) -> Self {
        Self { source }
    }

    /// Wait until the condition holds, the deadline passes or `cancel` fires.
    ///
    /// The token and deadline are checked before every fetch and every
    /// sleep; once either has tripped no further fetch is made.
    pub async fn wait(
        &self,
        spec: &WaitSpec,
        cancel: &CancellationToken,
    ) -> Result<WaitReport, WaitError> {
        let condition = spec.resolve()?;
        let started = Instant::now();
        let deadline = started + spec.deadline;
        let mut backoff = Backoff::new(spec.backoff);
        let mut polls: u32 = 0;
        let mut last_error: Option<String> = None;

        info!(condition = %condition, deadline_ms = spec.deadline.as_millis() as u64, "waiting for resource");

        loop {
            self.check_stop(cancel, deadline, spec.deadline, polls, &last_error)?;

            polls += 1;
            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled { polls }),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(WaitError::DeadlineExceeded {
                        deadline: spec.deadline,
                        polls,
                        last_error: last_error.or_else(|| Some("fetch did not complete before the deadline".to_string())),
                    });
                }
                tick = self.tick(&condition) => tick,
            };

            match tick {
                Tick::Satisfied => {
                    let elapsed = started.elapsed();
                    info!(condition = %condition, polls, elapsed_ms = elapsed.as_millis() as u64, "resource ready");
                    return Ok(WaitReport { polls, elapsed });
                }
                Tick::Pending => {
                    debug!(condition = %condition, polls, elapsed_ms = started.elapsed().as_millis() as u64, "resource not ready yet");
                }
                Tick::FetchFailed(err) => {
                    debug!(condition = %condition, polls, error = %err, "fetch failed, retrying");
                    last_error = Some(err);
                }
            }

            self.check_stop(cancel, deadline, spec.deadline, polls, &last_error)?;

            // Never sleep past the deadline
            let wake = (Instant::now() + backoff.next_delay()).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled { polls }),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn check_stop(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        budget: Duration,
        polls: u32,
        last_error: &Option<String>,
    ) -> Result<(), WaitError> {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled { polls });
        }
        if Instant::now() >= deadline {
            return Err(WaitError::DeadlineExceeded {
                deadline: budget,
                polls,
                last_error: last_error.clone(),
            });
        }
        Ok(())
    }

    async fn tick(&self, condition: &Condition) -> Tick {
        match condition {
            Condition::ReadyReplicas { name, .. } => match self.source.workload_state(name).await {
                Ok(state) if condition.holds_for_workload(&state) => Tick::Satisfied,
                Ok(_) => Tick::Pending,
                Err(e) => Tick::FetchFailed(format!("{:#}", e)),
            },
            Condition::PodPhase { name, .. } => match self.source.pod_state(name).await {
                Ok(state) if condition.holds_for_pod(&state) => Tick::Satisfied,
                Ok(_) => Tick::Pending,
                Err(e) => Tick::FetchFailed(format!("{:#}", e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of observations, repeating the last one
    struct ScriptedSource {
        replicas: Mutex<Vec<anyhow::Result<i32>>>,
        pods: Mutex<Vec<PodState>>,
        polls: AtomicU32,
    }

    impl ScriptedSource {
        fn replicas(seq: Vec<anyhow::Result<i32>>) -> Self {
            Self {
                replicas: Mutex::new(seq),
                pods: Mutex::new(Vec::new()),
                polls: AtomicU32::new(0),
            }
        }

        fn pods(seq: Vec<PodState>) -> Self {
            Self {
                replicas: Mutex::new(Vec::new()),
                pods: Mutex::new(seq),
                polls: AtomicU32::new(0),
            }
        }

        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StateSource for ScriptedSource {
        async fn workload_state(&self, _name: &str) -> anyhow::Result<WorkloadState> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut seq = self.replicas.lock().unwrap();
            let next = if seq.len() > 1 { seq.remove(0) } else {
                match seq.first() {
                    Some(Ok(n)) => Ok(*n),
                    Some(Err(e)) => Err(anyhow::anyhow!("{}", e)),
                    None => Ok(0),
                }
            };
            next.map(|ready_replicas| WorkloadState { ready_replicas })
        }

        async fn pod_state(&self, _name: &str) -> anyhow::Result<PodState> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut seq = self.pods.lock().unwrap();
            if seq.len() > 1 {
                Ok(seq.remove(0))
            } else {
                Ok(seq.first().cloned().unwrap_or_default())
            }
        }
    }

    fn fast() -> BackoffConfig {
        BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deployment_succeeds_on_fourth_observation() {
        let source = ScriptedSource::replicas(vec![Ok(0), Ok(1), Ok(1), Ok(2), Ok(3)]);
        let spec = WaitSpec::deployment("smoketest", 2, Duration::from_secs(10)).with_backoff(fast());

        let report = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.polls, 4);
        assert_eq!(source.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let source = ScriptedSource::replicas(vec![
            Err(anyhow::anyhow!("deployments.apps \"smoketest\" not found")),
            Err(anyhow::anyhow!("connection reset")),
            Ok(2),
        ]);
        let spec = WaitSpec::deployment("smoketest", 2, Duration::from_secs(10)).with_backoff(fast());

        let report = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let source = ScriptedSource::replicas(vec![Ok(0)]);
        let spec = WaitSpec::deployment("smoketest", 2, Duration::from_millis(200)).with_backoff(fast());

        let start = Instant::now();
        let err = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, WaitError::DeadlineExceeded { .. }));
        assert!(elapsed >= Duration::from_millis(200), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(250), "returned late: {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_last_fetch_error() {
        let source = ScriptedSource::replicas(vec![Err(anyhow::anyhow!("forbidden"))]);
        let spec = WaitSpec::deployment("smoketest", 2, Duration::from_millis(100)).with_backoff(fast());

        let err = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            WaitError::DeadlineExceeded { last_error, .. } => {
                assert_eq!(last_error.as_deref(), Some("forbidden"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_kind_never_polls() {
        let source = ScriptedSource::replicas(vec![Ok(2)]);
        let spec = WaitSpec {
            kind: ResourceKind::StatefulSet,
            options: WaitOptions::default(),
            backoff: fast(),
            deadline: Duration::from_secs(1),
        };

        let err = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Unsupported(ResourceKind::StatefulSet));
        assert_eq!(source.polls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_options_rejected_before_polling() {
        let source = ScriptedSource::replicas(vec![Ok(2)]);

        let mut spec = WaitSpec::deployment("smoketest", 2, Duration::from_secs(1));
        spec.options.target_pod_name = Some("nginx".to_string());
        let err = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::InvalidOption(_)));

        let mut spec = WaitSpec::pod("nginx", Duration::from_secs(1));
        spec.options.target_replica_count = Some(1);
        let err = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::InvalidOption(_)));

        assert_eq!(source.polls(), 0);
    }

    #[test]
    fn test_resolve_requires_fields() {
        let mut spec = WaitSpec::deployment("smoketest", 2, Duration::from_secs(1));
        spec.options.target_replica_count = None;
        assert!(matches!(spec.resolve(), Err(WaitError::InvalidOption(_))));

        let spec = WaitSpec::deployment("smoketest", -1, Duration::from_secs(1));
        assert!(matches!(spec.resolve(), Err(WaitError::InvalidOption(_))));

        let spec = WaitSpec::pod("  ", Duration::from_secs(1));
        assert!(matches!(spec.resolve(), Err(WaitError::InvalidOption(_))));

        let spec = WaitSpec::pod("nginx", Duration::ZERO);
        assert!(matches!(spec.resolve(), Err(WaitError::InvalidOption(_))));
    }

    #[test]
    fn test_pod_phase_defaults_to_running() {
        let spec = WaitSpec::pod("nginx", Duration::from_secs(1));
        assert_eq!(
            spec.resolve().unwrap(),
            Condition::PodPhase {
                name: "nginx".to_string(),
                phase: PodPhase::Running
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_running() {
        let source = ScriptedSource::pods(vec![
            PodState { phase: Some("Pending".to_string()), terminated_reason: None },
            PodState { phase: Some("Running".to_string()), terminated_reason: None },
        ]);
        let spec = WaitSpec::pod("nginx", Duration::from_secs(5)).with_backoff(fast());

        let report = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_completed() {
        let source = ScriptedSource::pods(vec![
            PodState { phase: Some("Running".to_string()), terminated_reason: None },
            PodState { phase: Some("Succeeded".to_string()), terminated_reason: Some("Error".to_string()) },
            PodState { phase: Some("Succeeded".to_string()), terminated_reason: Some("Completed".to_string()) },
        ]);
        let spec = WaitSpec::pod("job", Duration::from_secs(5))
            .with_phase(PodPhase::Completed)
            .with_backoff(fast());

        let report = ReadinessWaiter::new(&source)
            .wait(&spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let source = ScriptedSource::replicas(vec![Ok(0)]);
        let spec = WaitSpec::deployment("smoketest", 2, Duration::from_secs(60)).with_backoff(fast());
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                token.cancel();
            })
        };

        let err = ReadinessWaiter::new(&source).wait(&spec, &token).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, WaitError::Cancelled { .. }));
        let polls_at_cancel = source.polls();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.polls(), polls_at_cancel);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_makes_no_fetch() {
        let source = ScriptedSource::replicas(vec![Ok(2)]);
        let spec = WaitSpec::deployment("smoketest", 2, Duration::from_secs(1)).with_backoff(fast());
        let token = CancellationToken::new();
        token.cancel();

        let err = ReadinessWaiter::new(&source).wait(&spec, &token).await.unwrap_err();
        assert_eq!(err, WaitError::Cancelled { polls: 0 });
        assert_eq!(source.polls(), 0);
    }
}
