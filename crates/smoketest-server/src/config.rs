//! Runtime configuration
//!
//! Every option can be given as a flag or through its environment variable.
//! [`Settings`] is the raw clap view; [`Config`] is the validated value the
//! registry and server are built from.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::logging::LogFormat;
use smoketest_probes::bindings::{BindingError, ServiceBindings};
use smoketest_probes::kubernetes::{IngressMismatch, IngressRule, KubernetesSettings};

/// Configuration errors, reported before anything runs
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Ingress(#[from] IngressMismatch),

    #[error(transparent)]
    Bindings(#[from] BindingError),

    #[error("KUBECONFIG_PATH is set but K8S_TESTIMAGE is not")]
    MissingTestImage,

    #[error("Invalid dashboard endpoint '{0}': must be an http(s) URL")]
    InvalidEndpoint(String),
}

/// Options shared by every subcommand
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Dashboard endpoint the results are POSTed to
    #[arg(long, env = "DASHBOARD_DATA_ENDPOINT")]
    pub dashboard_endpoint: Option<String>,

    /// Kubeconfig of the cluster to test; enables the Kubernetes probe
    #[arg(long, env = "KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace the test resources are created in
    #[arg(long, env = "K8S_NAMESPACE", default_value = "smoketest")]
    pub k8s_namespace: String,

    /// Image of the test deployment
    #[arg(long, env = "K8S_TESTIMAGE")]
    pub k8s_test_image: Option<String>,

    /// Image pull secret of the test deployment
    #[arg(long, env = "K8S_IMG_PULL_SECRET")]
    pub k8s_pull_secret: Option<String>,

    /// Ingress hosts, comma separated
    #[arg(long, env = "K8S_ING_HOSTS", value_delimiter = ',')]
    pub k8s_ingress_hosts: Vec<String>,

    /// TLS secret per ingress host, comma separated
    #[arg(long, env = "K8S_ING_HOSTS_TLS", value_delimiter = ',')]
    pub k8s_ingress_tls: Vec<String>,

    /// Ingress class per ingress host, comma separated
    #[arg(long, env = "K8S_ING_HOSTS_CLASS", value_delimiter = ',')]
    pub k8s_ingress_class: Vec<String>,

    /// Upper bound on the rollout wait, in seconds
    #[arg(long, env = "K8S_ROLLOUT_TIMEOUT_SECS", default_value_t = 120)]
    pub k8s_rollout_timeout_secs: u64,

    /// Site type shown in the self probe, e.g. `Production`
    #[arg(long, env = "TYPE")]
    pub site_type: Option<String>,

    /// Site name shown in the self probe
    #[arg(long, env = "SITE")]
    pub site: Option<String>,

    /// File written on the shared SMB volume
    #[arg(long, env = "SMB_FILE")]
    pub smb_file: Option<String>,

    /// Redirect URI registered for the SSO client
    #[arg(long, env = "UAA_RES_URL")]
    pub uaa_redirect_url: Option<String>,

    /// Per-probe timeout in seconds, 0 disables it
    #[arg(long, env = "PROBE_TIMEOUT_SECS", default_value_t = 300)]
    pub probe_timeout_secs: u64,

    /// Service bindings document
    #[arg(long, env = "VCAP_SERVICES", hide_env_values = true)]
    pub vcap_services: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Kubernetes probe configuration
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub kubeconfig: PathBuf,
    pub namespace: String,
    pub probe: KubernetesSettings,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub dashboard_endpoint: Option<String>,
    pub bindings: ServiceBindings,
    pub kubernetes: Option<KubernetesConfig>,
    pub site_type: Option<String>,
    pub site: Option<String>,
    pub smb_file: Option<String>,
    pub uaa_redirect_url: Option<String>,
    pub probe_timeout: Option<Duration>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Trim every entry; a list holding only blanks counts as unset
fn list(values: Vec<String>) -> Vec<String> {
    let values: Vec<String> = values.into_iter().map(|v| v.trim().to_string()).collect();
    if values.iter().all(String::is_empty) {
        Vec::new()
    } else {
        values
    }
}

impl TryFrom<Settings> for Config {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let dashboard_endpoint = non_empty(settings.dashboard_endpoint);
        if let Some(endpoint) = &dashboard_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
            }
        }

        let bindings = match non_empty(settings.vcap_services) {
            Some(json) => ServiceBindings::parse(&json)?,
            None => ServiceBindings::empty(),
        };

        let ingresses = IngressRule::zip(
            &list(settings.k8s_ingress_hosts),
            &list(settings.k8s_ingress_tls),
            &list(settings.k8s_ingress_class),
        )?;

        let kubernetes = match settings.kubeconfig.filter(|p| !p.as_os_str().is_empty()) {
            Some(kubeconfig) => {
                let image = non_empty(settings.k8s_test_image).ok_or(ConfigError::MissingTestImage)?;
                let mut probe = KubernetesSettings::new(image);
                probe.pull_secret = non_empty(settings.k8s_pull_secret);
                probe.ingresses = ingresses;
                probe.rollout_timeout = Duration::from_secs(settings.k8s_rollout_timeout_secs);
                Some(KubernetesConfig {
                    kubeconfig,
                    namespace: settings.k8s_namespace,
                    probe,
                })
            }
            None => None,
        };

        Ok(Config {
            dashboard_endpoint,
            bindings,
            kubernetes,
            site_type: non_empty(settings.site_type),
            site: non_empty(settings.site),
            smb_file: non_empty(settings.smb_file),
            uaa_redirect_url: non_empty(settings.uaa_redirect_url),
            probe_timeout: Some(settings.probe_timeout_secs)
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let mut argv = vec!["smoketest"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().settings.try_into()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert!(config.kubernetes.is_none());
        assert!(config.dashboard_endpoint.is_none());
        assert_eq!(config.probe_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_kubernetes_settings() {
        let config = parse(&[
            "--kubeconfig",
            "/etc/kube/config",
            "--k8s-test-image",
            "nginx:1.25",
            "--k8s-ingress-hosts",
            "a.example.com,b.example.com",
            "--k8s-ingress-tls",
            "a-tls,b-tls",
            "--k8s-ingress-class",
            "nginx,nginx",
            "--k8s-rollout-timeout-secs",
            "45",
        ])
        .unwrap();

        let k8s = config.kubernetes.unwrap();
        assert_eq!(k8s.namespace, "smoketest");
        assert_eq!(k8s.probe.ingresses.len(), 2);
        assert_eq!(k8s.probe.ingresses[1].host, "b.example.com");
        assert_eq!(k8s.probe.rollout_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_mismatched_ingress_lists() {
        let err = parse(&[
            "--k8s-ingress-hosts",
            "a.example.com,b.example.com",
            "--k8s-ingress-tls",
            "a-tls",
            "--k8s-ingress-class",
            "nginx,nginx",
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Ingress(_)));
    }

    #[test]
    fn test_kubeconfig_requires_image() {
        let err = parse(&["--kubeconfig", "/etc/kube/config"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTestImage));
    }

    #[test]
    fn test_malformed_bindings() {
        let err = parse(&["--vcap-services", "{not json"]).unwrap_err();
        assert!(matches!(err, ConfigError::Bindings(BindingError::Malformed(_))));
    }

    #[test]
    fn test_zero_probe_timeout_disables_it() {
        let config = parse(&["--probe-timeout-secs", "0"]).unwrap();
        assert!(config.probe_timeout.is_none());
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = parse(&["--dashboard-endpoint", "dashboard.local/data"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint(_)));
    }
}
