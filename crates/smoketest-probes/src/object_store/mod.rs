//! Object storage probe (S3)
//!
//! Script: Upload object → Download object → Delete object. Once the upload
//! succeeded the object is deleted even if the download step failed.

#[cfg(feature = "s3")]
pub mod s3;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::bindings::{Binding, BindingError};
use smoketest_core::{Probe, StepLog, TestResult};

pub const KEY: &str = "s3";
pub const NAME: &str = "S3";

/// Key of the object written by the probe
pub const OBJECT_KEY: &str = "s3testfile";

/// Connection settings read from an `s3-bucket` binding
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    pub path_style: bool,
}

impl std::fmt::Debug for ObjectStoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSettings")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct BucketCredential {
    bucket: String,
    #[serde(default)]
    region: Option<String>,
}

impl ObjectStoreSettings {
    /// Default region when the bucket entry has none
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    pub fn from_binding(binding: &Binding) -> Result<Self, BindingError> {
        let buckets = binding
            .credential("buckets")
            .ok_or_else(|| BindingError::MissingCredential {
                service: binding.name.clone(),
                key: "buckets".to_string(),
            })?;
        let invalid = || BindingError::InvalidCredential {
            service: binding.name.clone(),
            key: "buckets".to_string(),
            expected: "list of buckets",
        };
        let buckets: Vec<BucketCredential> =
            serde_json::from_value(buckets.clone()).map_err(|_| invalid())?;
        let first = buckets.into_iter().next().ok_or_else(invalid)?;

        Ok(Self {
            endpoint: binding.credential_str("endpoint")?.to_string(),
            access_key_id: binding.credential_str("access_key_id")?.to_string(),
            secret_access_key: binding.credential_str("secret_access_key")?.to_string(),
            bucket: first.bucket,
            region: first
                .region
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| Self::DEFAULT_REGION.to_string()),
            path_style: binding.credential_bool("pathStyleAccess", false)?,
        })
    }
}

/// A bucket the probe can write to
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Object storage probe
pub struct ObjectStoreProbe {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreProbe {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Probe for ObjectStoreProbe {
    fn key(&self) -> &str {
        KEY
    }

    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> TestResult {
        let mut steps = StepLog::new();
        let content = format!("smoketest {}", chrono::Utc::now().to_rfc3339());

        let uploaded = steps
            .run("Upload object", self.store.put(OBJECT_KEY, content.clone().into_bytes()))
            .await;

        if uploaded.is_some() {
            steps
                .run("Download object", async {
                    let body = self.store.get(OBJECT_KEY).await?;
                    if body != content.as_bytes() {
                        bail!("Downloaded content differs from uploaded content");
                    }
                    Ok(())
                })
                .await;

            steps.run("Delete object", self.store.delete(OBJECT_KEY)).await;
        }

        steps.finish(KEY, NAME)
    }
}
