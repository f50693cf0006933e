//! Cache probe (Redis)
//!
//! Script: Open connection → Ping → Pong → Write key → Read key → Delete
//! key, stopping at the first failure. Once the key is written it is always
//! deleted, and it carries an expiry in case the delete fails too.

#[cfg(feature = "redis")]
pub mod redis;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::bindings::{Binding, BindingError};
use smoketest_core::{Probe, StepLog, TestResult};

const PONG: &str = "PONG";

/// Default bound on opening the connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Expiry of the test key
pub const KEY_TTL: Duration = Duration::from_secs(300);

/// Connection settings read from a service binding
#[derive(Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl std::fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CacheSettings {
    pub fn from_binding(binding: &Binding) -> Result<Self, BindingError> {
        Ok(Self {
            host: binding.credential_str("host")?.to_string(),
            port: binding.credential_u16("port")?,
            password: binding.optional_str("password").map(str::to_string),
        })
    }
}

/// Opens cache connections
#[async_trait]
pub trait CacheConnector: Send + Sync {
    async fn connect(&self, settings: &CacheSettings) -> anyhow::Result<Box<dyn CacheSession>>;
}

/// One open cache connection
#[async_trait]
pub trait CacheSession: Send {
    /// Send PING, returning the server's reply
    async fn ping(&mut self) -> anyhow::Result<String>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set(&mut self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&mut self, key: &str) -> anyhow::Result<Option<String>>;

    /// Delete `key`, returning the number of keys removed
    async fn delete(&mut self, key: &str) -> anyhow::Result<u64>;
}

/// Cache probe
pub struct CacheProbe {
    key: String,
    name: String,
    settings: CacheSettings,
    connector: Arc<dyn CacheConnector>,
    connect_timeout: Duration,
}

impl CacheProbe {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        settings: CacheSettings,
        connector: Arc<dyn CacheConnector>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            settings,
            connector,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    async fn exercise(&self, steps: &mut StepLog, session: &mut dyn CacheSession) {
        let Some(reply) = steps.run("Ping", session.ping()).await else {
            return;
        };

        let pong = steps.run_sync("Pong", || {
            if reply == PONG {
                Ok(())
            } else {
                Err(anyhow!("No PONG reply from Redis, got '{}'", reply))
            }
        });
        if pong.is_none() {
            return;
        }

        let cache_key = format!("smoketest:{}", uuid::Uuid::new_v4());
        let value = chrono::Utc::now().timestamp().to_string();

        if steps.run("Write key", session.set(&cache_key, &value, KEY_TTL)).await.is_none() {
            return;
        }

        steps
            .run("Read key", async {
                match session.get(&cache_key).await? {
                    Some(v) if v == value => Ok(()),
                    Some(v) => bail!("Read value '{}' differs from written value '{}'", v, value),
                    None => bail!("Key {} not found", cache_key),
                }
            })
            .await;

        steps.run("Delete key", session.delete(&cache_key)).await;
    }
}

#[async_trait]
impl Probe for CacheProbe {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> TestResult {
        let mut steps = StepLog::new();

        let opened = steps
            .run("Open connection", async {
                match tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.settings)).await {
                    Ok(session) => session,
                    Err(_) => bail!("Timed out opening connection after {:?}", self.connect_timeout),
                }
            })
            .await;

        if let Some(mut session) = opened {
            self.exercise(&mut steps, session.as_mut()).await;
        }

        steps.finish(self.key.clone(), self.name.clone())
    }
}
