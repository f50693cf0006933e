//! Kubernetes probe
//!
//! Deploys a small web server, exposes it through a service and one ingress
//! per configured host, waits for the rollout, checks every host over HTTPS
//! and removes everything again.
//!
//! Each resource is pushed onto the teardown stack before its create call is
//! issued, so a create that failed halfway is still followed by a delete.
//! Teardown runs in exact reverse creation order whatever happened before,
//! and a failed delete is recorded without stopping the remaining deletes.
//! Cancellation ends the rollout wait and the connection checks early but
//! never skips teardown.

#[cfg(feature = "kubernetes")]
pub mod cluster;
pub mod reachability;

use anyhow::bail;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use smoketest_core::wait::{ReadinessWaiter, StateSource, WaitSpec};
use smoketest_core::{Probe, StepLog, TestResult};

pub const KEY: &str = "kubernetes";
pub const NAME: &str = "Kubernetes";

/// Name of the test deployment
pub const DEPLOYMENT_NAME: &str = "smoketest";
/// Name of the service in front of the deployment
pub const SERVICE_NAME: &str = "smoketest-svc";
/// Value of the `app` label shared by the pods and the service selector
pub const APP_LABEL: &str = "smoketest";
pub const REPLICAS: i32 = 2;
pub const SERVICE_PORT: i32 = 80;

/// Default upper bound on the rollout wait
pub const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(120);
/// Attempts made per host by the connection test
pub const REACH_ATTEMPTS: u32 = 12;
/// Fixed pause between connection attempts
pub const REACH_INTERVAL: Duration = Duration::from_millis(250);

/// One ingress rule: host, TLS secret and ingress class at the same index
/// of their configuration lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub host: String,
    pub tls_secret: String,
    pub class: String,
}

/// The three ingress lists do not line up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Ingress configuration mismatch: {hosts} hosts, {tls_secrets} TLS secrets, {classes} classes")]
pub struct IngressMismatch {
    pub hosts: usize,
    pub tls_secrets: usize,
    pub classes: usize,
}

impl IngressRule {
    /// Combine the positional lists into rules, refusing lists of unequal
    /// length
    pub fn zip(hosts: &[String], tls_secrets: &[String], classes: &[String]) -> Result<Vec<Self>, IngressMismatch> {
        if hosts.len() != tls_secrets.len() || hosts.len() != classes.len() {
            return Err(IngressMismatch {
                hosts: hosts.len(),
                tls_secrets: tls_secrets.len(),
                classes: classes.len(),
            });
        }
        Ok(hosts
            .iter()
            .zip(tls_secrets)
            .zip(classes)
            .map(|((host, tls_secret), class)| IngressRule {
                host: host.clone(),
                tls_secret: tls_secret.clone(),
                class: class.clone(),
            })
            .collect())
    }
}

/// A resource the probe creates and later deletes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Deployment {
        name: String,
        image: String,
        replicas: i32,
        pull_secret: Option<String>,
    },
    Service {
        name: String,
        port: i32,
    },
    Ingress {
        name: String,
        rule: IngressRule,
        service: String,
        port: i32,
    },
}

impl Resource {
    pub fn name(&self) -> &str {
        match self {
            Resource::Deployment { name, .. } | Resource::Service { name, .. } | Resource::Ingress { name, .. } => name,
        }
    }

    fn create_label(&self) -> String {
        format!("Create {}", self)
    }

    fn delete_label(&self) -> String {
        format!("Delete {}", self)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Deployment { .. } => f.write_str("deployment"),
            Resource::Service { .. } => f.write_str("service"),
            Resource::Ingress { rule, .. } => write!(f, "ingress {}", rule.host),
        }
    }
}

/// Orchestration API used by the probe; also the waiter's state source
#[async_trait]
pub trait ClusterApi: StateSource {
    async fn create(&self, resource: &Resource) -> anyhow::Result<()>;

    async fn delete(&self, resource: &Resource) -> anyhow::Result<()>;

    fn as_state_source(&self) -> &dyn StateSource;
}

/// HTTP reachability of an exposed host
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Status code of a GET against `url`
    async fn status(&self, url: &str) -> anyhow::Result<u16>;
}

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesSettings {
    pub image: String,
    pub pull_secret: Option<String>,
    pub ingresses: Vec<IngressRule>,
    pub rollout_timeout: Duration,
    pub reach_attempts: u32,
    pub reach_interval: Duration,
}

impl KubernetesSettings {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            pull_secret: None,
            ingresses: Vec::new(),
            rollout_timeout: ROLLOUT_TIMEOUT,
            reach_attempts: REACH_ATTEMPTS,
            reach_interval: REACH_INTERVAL,
        }
    }

    fn deployment(&self) -> Resource {
        Resource::Deployment {
            name: DEPLOYMENT_NAME.to_string(),
            image: self.image.clone(),
            replicas: REPLICAS,
            pull_secret: self.pull_secret.clone().filter(|s| !s.is_empty()),
        }
    }

    fn service(&self) -> Resource {
        Resource::Service {
            name: SERVICE_NAME.to_string(),
            port: SERVICE_PORT,
        }
    }

    fn ingress(&self, index: usize, rule: &IngressRule) -> Resource {
        Resource::Ingress {
            name: format!("smoketest-ingress-{}", index),
            rule: rule.clone(),
            service: SERVICE_NAME.to_string(),
            port: SERVICE_PORT,
        }
    }
}

/// Kubernetes probe
pub struct KubernetesProbe {
    settings: KubernetesSettings,
    cluster: Arc<dyn ClusterApi>,
    reachability: Arc<dyn Reachability>,
}

impl KubernetesProbe {
    pub fn new(settings: KubernetesSettings, cluster: Arc<dyn ClusterApi>, reachability: Arc<dyn Reachability>) -> Self {
        Self {
            settings,
            cluster,
            reachability,
        }
    }

    /// Create step for `resource`, registering it for teardown first
    async fn create(&self, steps: &mut StepLog, teardown: &mut Vec<Resource>, resource: Resource) -> bool {
        teardown.push(resource.clone());
        let label = resource.create_label();
        steps.run(&label, self.cluster.create(&resource)).await.is_some()
    }

    async fn provision(&self, steps: &mut StepLog, teardown: &mut Vec<Resource>, cancel: &CancellationToken) -> bool {
        if !self.create(steps, teardown, self.settings.deployment()).await {
            return false;
        }
        if !self.create(steps, teardown, self.settings.service()).await {
            return false;
        }
        for (index, rule) in self.settings.ingresses.iter().enumerate() {
            if !self.create(steps, teardown, self.settings.ingress(index, rule)).await {
                return false;
            }
        }

        let spec = WaitSpec::deployment(DEPLOYMENT_NAME, REPLICAS, self.settings.rollout_timeout);
        let waiter = ReadinessWaiter::new(self.cluster.as_state_source());
        let rollout = async { waiter.wait(&spec, cancel).await.map_err(anyhow::Error::from) };
        steps.run("Wait for deployment", rollout).await.is_some()
    }

    async fn test_connection(&self, host: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        let url = format!("https://{}", host);
        let mut last = String::from("no attempt made");

        for attempt in 1..=self.settings.reach_attempts {
            let status = tokio::select! {
                _ = cancel.cancelled() => bail!("Connection test cancelled after {} attempts", attempt - 1),
                status = self.reachability.status(&url) => status,
            };
            match status {
                Ok(200) => {
                    debug!(host, attempt, "host reachable");
                    return Ok(());
                }
                Ok(status) => last = format!("status code {}", status),
                Err(e) => last = format!("{:#}", e),
            }
            if attempt < self.settings.reach_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => bail!("Connection test cancelled after {} attempts", attempt),
                    _ = tokio::time::sleep(self.settings.reach_interval) => {}
                }
            }
        }
        bail!(
            "Failed to reach test deployment at {} after {} attempts, last result: {}",
            url,
            self.settings.reach_attempts,
            last
        )
    }

    async fn tear_down(&self, steps: &mut StepLog, teardown: Vec<Resource>) {
        for resource in teardown.into_iter().rev() {
            let label = resource.delete_label();
            steps.run(&label, self.cluster.delete(&resource)).await;
        }
    }
}

#[async_trait]
impl Probe for KubernetesProbe {
    fn key(&self) -> &str {
        KEY
    }

    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> TestResult {
        self.run_cancellable(&CancellationToken::new()).await
    }

    async fn run_cancellable(&self, cancel: &CancellationToken) -> TestResult {
        let mut steps = StepLog::new();
        let mut teardown = Vec::new();

        if self.provision(&mut steps, &mut teardown, cancel).await {
            // Hosts are independent; check all of them
            for rule in &self.settings.ingresses {
                if cancel.is_cancelled() {
                    break;
                }
                let label = format!("Test connection {}", rule.host);
                steps.run(&label, self.test_connection(&rule.host, cancel)).await;
            }
        }

        info!(resources = teardown.len(), "tearing down test resources");
        self.tear_down(&mut steps, teardown).await;

        steps.finish(KEY, NAME)
    }
}
