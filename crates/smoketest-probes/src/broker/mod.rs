//! Message broker probe (RabbitMQ)
//!
//! The probe publishes one message while a spawned listener task consumes
//! it from a second channel on the same connection. The listener reports
//! its own steps over an mpsc channel; the probe drains that channel until
//! the listener drops its sender.
//!
//! Probe steps: Open connection → Create publishing channel → Declare queue
//! → Publish message. Listener steps: Create listening channel → Consume
//! message → Check message.

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bindings::{Binding, BindingError};
use smoketest_core::{Probe, StepLog, TestResult};

/// Queue used for the round trip
pub const QUEUE_NAME: &str = "smoketestsQueue";

/// How long the listener waits for the published message
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on opening the connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection settings read from a service binding
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// AMQP URI, credentials included
    pub uri: String,
}

impl std::fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSettings").finish_non_exhaustive()
    }
}

impl BrokerSettings {
    pub fn from_binding(binding: &Binding) -> Result<Self, BindingError> {
        Ok(Self {
            uri: binding.credential_str("uri")?.to_string(),
        })
    }
}

/// Opens broker connections
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, settings: &BrokerSettings) -> anyhow::Result<Arc<dyn BrokerConnection>>;
}

/// An open broker connection, shared by the probe and its listener task
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> anyhow::Result<Box<dyn BrokerChannel>>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// A channel on a broker connection
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare a non-durable, auto-deleted queue
    async fn declare_queue(&mut self, queue: &str) -> anyhow::Result<()>;

    /// Publish `body` to `queue` through the default exchange
    async fn publish(&mut self, queue: &str, body: &[u8]) -> anyhow::Result<()>;

    /// Start consuming `queue` with automatic acknowledgement
    async fn consume(&mut self, queue: &str) -> anyhow::Result<Box<dyn MessageStream>>;

    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Messages delivered to a consumer
#[async_trait]
pub trait MessageStream: Send {
    /// Next message body; `None` once the consumer was cancelled
    async fn next_message(&mut self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Message broker probe
pub struct BrokerProbe {
    key: String,
    name: String,
    settings: BrokerSettings,
    connector: Arc<dyn BrokerConnector>,
    queue: String,
    receive_timeout: Duration,
}

impl BrokerProbe {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        settings: BrokerSettings,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            settings,
            connector,
            queue: QUEUE_NAME.to_string(),
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    async fn exercise(&self, steps: &mut StepLog, connection: Arc<dyn BrokerConnection>) {
        let Some(mut channel) = steps
            .run("Create publishing channel", connection.open_channel())
            .await
        else {
            return;
        };

        if steps
            .run("Declare queue", channel.declare_queue(&self.queue))
            .await
            .is_some()
        {
            let message = chrono::Utc::now().timestamp().to_string();

            let (tx, mut rx) = mpsc::channel(8);
            let listener = tokio::spawn(listen(
                connection.clone(),
                self.queue.clone(),
                message.clone(),
                self.receive_timeout,
                tx,
            ));

            if steps
                .run("Publish message", channel.publish(&self.queue, message.as_bytes()))
                .await
                .is_some()
            {
                while let Some(result) = rx.recv().await {
                    steps.record(result);
                }
                if let Err(e) = listener.await {
                    if e.is_panic() {
                        steps.fail("Check message", "Listener task panicked");
                    }
                }
            } else {
                // Nothing was sent, so there is nothing to wait for
                listener.abort();
            }
        }

        if let Err(e) = channel.close().await {
            debug!(probe = %self.key, error = %e, "failed to close publishing channel");
        }
    }
}

#[async_trait]
impl Probe for BrokerProbe {
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
                tokio::time::timeout(CONNECT_TIMEOUT, self.connector.connect(&self.settings))
                    .await
                    .context("Timed out opening connection")?
            })
            .await;

        if let Some(connection) = opened {
            self.exercise(&mut steps, connection.clone()).await;
            if let Err(e) = connection.close().await {
                warn!(probe = %self.key, error = %format!("{:#}", e), "failed to close connection");
            }
        }

        steps.finish(self.key.clone(), self.name.clone())
    }
}

/// Run one listener step and forward its leaf to the probe
async fn report<T, F>(tx: &mpsc::Sender<TestResult>, label: &str, step: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let mut log = StepLog::new();
    let value = log.run(label, step).await;
    for result in log.into_results() {
        // The probe only stops receiving once it gave up on the listener
        if tx.send(result).await.is_err() {
            return None;
        }
    }
    value
}

/// Listener task. Dropping `tx` on return closes the result channel.
async fn listen(
    connection: Arc<dyn BrokerConnection>,
    queue: String,
    expected: String,
    receive_timeout: Duration,
    tx: mpsc::Sender<TestResult>,
) {
    let Some(mut channel) = report(&tx, "Create listening channel", connection.open_channel()).await else {
        return;
    };

    if let Some(mut messages) = report(&tx, "Consume message", channel.consume(&queue)).await {
        report(&tx, "Check message", async {
            let body = tokio::time::timeout(receive_timeout, messages.next_message())
                .await
                .map_err(|_| anyhow!("No message received within {}s", receive_timeout.as_secs()))??
                .ok_or_else(|| anyhow!("Consumer closed before a message arrived"))?;

            if body != expected.as_bytes() {
                bail!("Received message was different from sent message");
            }
            Ok(())
        })
        .await;
    }

    if let Err(e) = channel.close().await {
        debug!(error = %e, "failed to close listening channel");
    }
}
