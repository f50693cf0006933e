//! Probe registry
//!
//! Builds the probe set from the service bindings and settings. A dependency
//! that is not bound is skipped; a binding that cannot be used becomes a
//! probe reporting why.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, KubernetesConfig};
use smoketest_core::Probe;
use smoketest_probes::bindings::{Binding, BindingError};
use smoketest_probes::broker::rabbitmq::RabbitMqConnector;
use smoketest_probes::cache::redis::RedisConnector;
use smoketest_probes::identity::uaa::UaaClient;
use smoketest_probes::kubernetes::cluster::KubeCluster;
use smoketest_probes::kubernetes::reachability::HttpsReachability;
use smoketest_probes::object_store::s3::S3Store;
use smoketest_probes::sql::mysql::MySqlConnector;
use smoketest_probes::sql::postgres::PostgresConnector;
use smoketest_probes::{
    file_share, identity, kubernetes, object_store, sql, BrokerProbe, BrokerSettings, CacheProbe, CacheSettings,
    FileShareProbe, IdentityProbe, IdentitySettings, KubernetesProbe, MeProbe, MisconfiguredProbe,
    ObjectStoreProbe, ObjectStoreSettings, SqlProbe, SqlSettings,
};

pub const MYSQL_LABEL: &str = "p.mysql";
pub const RABBITMQ_SERVICES: [(&str, &str); 2] = [
    ("p-rabbitmq", "RabbitMQ Shared Cluster"),
    ("p.rabbitmq", "RabbitMQ On-Demand"),
];
pub const REDIS_SERVICES: [(&str, &str); 2] = [("p-redis", "Redis Shared Cluster"), ("p.redis", "Redis On-Demand")];
pub const POSTGRES_LABEL: &str = "postgres-db";
pub const POSTGRES_NAME: &str = "Postgres";
pub const SMB_LABEL: &str = "shared-volume";
pub const SMB_NAME: &str = "Shared SMB volume";
pub const NFS_TAG: &str = "nfs";
pub const S3_TAG: &str = "s3-bucket";
pub const IDENTITY_LABEL: &str = "p-identity";

/// Step reporting a cluster that cannot be reached
const LOAD_KUBECONFIG: &str = "Load kubeconfig";

/// Probe for `binding`, or `None` when nothing is bound
fn bound<S>(
    key: &str,
    name: &str,
    binding: Option<&Binding>,
    parse: impl FnOnce(&Binding) -> Result<S, BindingError>,
    build: impl FnOnce(S) -> Box<dyn Probe>,
) -> Option<Box<dyn Probe>> {
    let binding = binding?;
    match parse(binding) {
        Ok(settings) => Some(build(settings)),
        Err(e) => {
            warn!(probe = key, service = %binding.name, error = %e, "service binding unusable");
            Some(Box::new(MisconfiguredProbe::new(key, name, e)))
        }
    }
}

fn identity_probe(config: &Config) -> Option<Box<dyn Probe>> {
    let binding = config.bindings.with_label(IDENTITY_LABEL);
    let Some(redirect_uri) = config.uaa_redirect_url.as_deref() else {
        if binding.is_some() {
            warn!("{} is bound but UAA_RES_URL is not set, skipping SSO probe", IDENTITY_LABEL);
        }
        return None;
    };

    bound(
        identity::KEY,
        identity::NAME,
        binding,
        |b| IdentitySettings::from_binding(b, redirect_uri),
        |settings| match UaaClient::new(settings) {
            Ok(client) => Box::new(IdentityProbe::new(Arc::new(client))),
            Err(e) => Box::new(MisconfiguredProbe::new(identity::KEY, identity::NAME, format!("{:#}", e))),
        },
    )
}

async fn kubernetes_probe(k8s: &KubernetesConfig) -> Box<dyn Probe> {
    let clients = async {
        let cluster = KubeCluster::from_kubeconfig(&k8s.kubeconfig, k8s.namespace.clone()).await?;
        let reachability = HttpsReachability::new()?;
        anyhow::Ok((cluster, reachability))
    };

    match clients.await {
        Ok((cluster, reachability)) => Box::new(KubernetesProbe::new(
            k8s.probe.clone(),
            Arc::new(cluster),
            Arc::new(reachability),
        )),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Kubernetes cluster unusable");
            Box::new(
                MisconfiguredProbe::new(kubernetes::KEY, kubernetes::NAME, format!("{:#}", e))
                    .with_step(LOAD_KUBECONFIG),
            )
        }
    }
}

/// Build the probe set in run order
pub async fn build_probes(config: &Config) -> Vec<Box<dyn Probe>> {
    let bindings = &config.bindings;
    let mut probes: Vec<Box<dyn Probe>> = vec![Box::new(MeProbe::new(
        config.site_type.as_deref(),
        config.site.as_deref(),
    ))];

    probes.extend(bound(
        sql::MYSQL_KEY,
        sql::MYSQL_NAME,
        bindings.with_label(MYSQL_LABEL),
        SqlSettings::mysql,
        |s| Box::new(SqlProbe::new(sql::MYSQL_KEY, sql::MYSQL_NAME, s, Arc::new(MySqlConnector))),
    ));

    for (label, name) in RABBITMQ_SERVICES {
        probes.extend(bound(
            label,
            name,
            bindings.with_label(label),
            BrokerSettings::from_binding,
            |s| Box::new(BrokerProbe::new(label, name, s, Arc::new(RabbitMqConnector))),
        ));
    }

    for (label, name) in REDIS_SERVICES {
        probes.extend(bound(
            label,
            name,
            bindings.with_label(label),
            CacheSettings::from_binding,
            |s| Box::new(CacheProbe::new(label, name, s, Arc::new(RedisConnector))),
        ));
    }

    probes.extend(bound(
        POSTGRES_LABEL,
        POSTGRES_NAME,
        bindings.with_label(POSTGRES_LABEL),
        SqlSettings::postgres,
        |s| Box::new(SqlProbe::new(POSTGRES_LABEL, POSTGRES_NAME, s, Arc::new(PostgresConnector))),
    ));

    probes.extend(bound(
        SMB_LABEL,
        SMB_NAME,
        bindings.with_label(SMB_LABEL),
        FileShareProbe::mount_dir,
        |dir| Box::new(FileShareProbe::new(SMB_LABEL, SMB_NAME, dir, config.smb_file.clone())),
    ));

    probes.extend(bound(
        file_share::NFS_KEY,
        file_share::NFS_NAME,
        bindings.with_tag(NFS_TAG),
        FileShareProbe::mount_dir,
        |dir| {
            Box::new(FileShareProbe::new(
                file_share::NFS_KEY,
                file_share::NFS_NAME,
                dir,
                Some(file_share::NFS_FILE.to_string()),
            ))
        },
    ));

    probes.extend(bound(
        object_store::KEY,
        object_store::NAME,
        bindings.with_tag(S3_TAG),
        ObjectStoreSettings::from_binding,
        |s| Box::new(ObjectStoreProbe::new(Arc::new(S3Store::new(&s)))),
    ));

    probes.extend(identity_probe(config));

    if let Some(k8s) = &config.kubernetes {
        probes.push(kubernetes_probe(k8s).await);
    }

    info!(
        probes = ?probes.iter().map(|p| p.key()).collect::<Vec<_>>(),
        "probe set built"
    );
    probes
}
