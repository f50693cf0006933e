//! Kubernetes API adapter (kube)

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

use super::{ClusterApi, Resource, APP_LABEL};
use smoketest_core::wait::{PodState, StateSource, WorkloadState};

/// Container name inside the test pods
const CONTAINER_NAME: &str = "webserver";
/// Seconds a pod must be ready before it counts as available
const MIN_READY_SECONDS: i32 = 7;

/// Cluster reached through a kubeconfig file, scoped to one namespace
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub async fn from_kubeconfig(path: impl AsRef<Path>, namespace: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let kubeconfig =
            Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("loading kubeconfig")?;
        let client = Client::try_from(config).context("creating Kubernetes client")?;

        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn manifest(resource: &Resource) -> Value {
    match resource {
        Resource::Deployment {
            name,
            image,
            replicas,
            pull_secret,
        } => {
            let mut pod_spec = json!({
                "containers": [{
                    "name": CONTAINER_NAME,
                    "image": image,
                    "ports": [{"containerPort": 80}]
                }]
            });
            if let Some(secret) = pull_secret {
                pod_spec["imagePullSecrets"] = json!([{ "name": secret }]);
            }
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": name, "labels": {"app": APP_LABEL}},
                "spec": {
                    "replicas": replicas,
                    "minReadySeconds": MIN_READY_SECONDS,
                    "selector": {"matchLabels": {"app": APP_LABEL}},
                    "template": {
                        "metadata": {"labels": {"app": APP_LABEL}},
                        "spec": pod_spec
                    }
                }
            })
        }
        Resource::Service { name, port } => json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": name},
            "spec": {
                "type": "ClusterIP",
                "selector": {"app": APP_LABEL},
                "ports": [{"name": "http", "port": port, "protocol": "TCP"}]
            }
        }),
        Resource::Ingress {
            name,
            rule,
            service,
            port,
        } => {
            let mut spec = json!({
                "rules": [{
                    "host": rule.host,
                    "http": {"paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {"service": {"name": service, "port": {"number": port}}}
                    }]}
                }]
            });
            if !rule.tls_secret.is_empty() {
                spec["tls"] = json!([{ "hosts": [rule.host], "secretName": rule.tls_secret }]);
            }
            if !rule.class.is_empty() {
                spec["ingressClassName"] = json!(rule.class);
            }
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "Ingress",
                "metadata": {"name": name},
                "spec": spec
            })
        }
    }
}

#[async_trait]
impl StateSource for KubeCluster {
    async fn workload_state(&self, name: &str) -> anyhow::Result<WorkloadState> {
        let deployment = self.api::<Deployment>().get(name).await?;
        let ready_replicas = deployment
            .status
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        Ok(WorkloadState { ready_replicas })
    }

    async fn pod_state(&self, name: &str) -> anyhow::Result<PodState> {
        let pod = self.api::<Pod>().get(name).await?;
        let status = pod.status.unwrap_or_default();
        let terminated_reason = status
            .container_statuses
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.state)
            .and_then(|s| s.terminated)
            .and_then(|t| t.reason);

        Ok(PodState {
            phase: status.phase,
            terminated_reason,
        })
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create(&self, resource: &Resource) -> anyhow::Result<()> {
        let params = PostParams::default();
        let body = manifest(resource);
        debug!(resource = resource.name(), namespace = %self.namespace, "creating");

        match resource {
            Resource::Deployment { .. } => {
                let object: Deployment = serde_json::from_value(body)?;
                self.api::<Deployment>().create(&params, &object).await?;
            }
            Resource::Service { .. } => {
                let object: Service = serde_json::from_value(body)?;
                self.api::<Service>().create(&params, &object).await?;
            }
            Resource::Ingress { .. } => {
                let object: Ingress = serde_json::from_value(body)?;
                self.api::<Ingress>().create(&params, &object).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: &Resource) -> anyhow::Result<()> {
        let params = DeleteParams::foreground();
        let name = resource.name();
        debug!(resource = name, namespace = %self.namespace, "deleting");

        match resource {
            Resource::Deployment { .. } => {
                self.api::<Deployment>().delete(name, &params).await?;
            }
            Resource::Service { .. } => {
                self.api::<Service>().delete(name, &params).await?;
            }
            Resource::Ingress { .. } => {
                self.api::<Ingress>().delete(name, &params).await?;
            }
        }
        Ok(())
    }

    fn as_state_source(&self) -> &dyn StateSource {
        self
    }
}
