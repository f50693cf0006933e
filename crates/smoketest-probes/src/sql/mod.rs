//! Relational database probe (Postgres, MySQL)
//!
//! Script: Open connection → Create table → Insert record → Select records →
//! Delete record. The first failing step ends the script; the connection is
//! closed on every path once it was opened.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::bindings::{Binding, BindingError};
use smoketest_core::{Probe, StepLog, TestResult};

pub const MYSQL_KEY: &str = "mySQL";
pub const MYSQL_NAME: &str = "MySQL";

const TABLE: &str = "deepthought";
const COLUMN: &str = "theanswertoeverything";
const ANSWER: i32 = 42;

/// Default bound on opening the connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SQL flavour, decides the bind placeholder syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    fn placeholder(&self) -> &'static str {
        match self {
            Dialect::Postgres => "$1",
            Dialect::MySql => "?",
        }
    }

    fn create_table(&self) -> String {
        let column_type = match self {
            Dialect::Postgres => "integer",
            Dialect::MySql => "INT",
        };
        format!("CREATE TABLE IF NOT EXISTS {}({} {})", TABLE, COLUMN, column_type)
    }

    fn insert(&self) -> String {
        format!("INSERT INTO {}({}) VALUES({})", TABLE, COLUMN, self.placeholder())
    }

    fn select_count(&self) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE {} = {}", TABLE, COLUMN, self.placeholder())
    }

    fn delete(&self) -> String {
        format!("DELETE FROM {} WHERE {} = {}", TABLE, COLUMN, self.placeholder())
    }
}

/// Where to connect
#[derive(Clone, PartialEq, Eq)]
pub enum SqlTarget {
    /// Full connection URI, e.g. `postgres://user:pw@host:5432/db`
    Uri(String),
    /// Individual connection parameters
    Parts {
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
    },
}

impl std::fmt::Debug for SqlTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlTarget::Uri(_) => f.write_str("Uri(<redacted>)"),
            SqlTarget::Parts { host, port, database, .. } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .finish_non_exhaustive(),
        }
    }
}

/// Connection settings read from a service binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSettings {
    pub dialect: Dialect,
    pub target: SqlTarget,
}

impl SqlSettings {
    /// Postgres bindings carry a `uri` credential
    pub fn postgres(binding: &Binding) -> Result<Self, BindingError> {
        Ok(Self {
            dialect: Dialect::Postgres,
            target: SqlTarget::Uri(binding.credential_str("uri")?.to_string()),
        })
    }

    /// MySQL bindings carry the individual connection parameters
    pub fn mysql(binding: &Binding) -> Result<Self, BindingError> {
        Ok(Self {
            dialect: Dialect::MySql,
            target: SqlTarget::Parts {
                host: binding.credential_str("hostname")?.to_string(),
                port: binding.credential_u16("port")?,
                database: binding.credential_str("name")?.to_string(),
                username: binding.credential_str("username")?.to_string(),
                password: binding.credential_str("password")?.to_string(),
            },
        })
    }
}

/// Opens database sessions
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn connect(&self, settings: &SqlSettings) -> anyhow::Result<Box<dyn SqlSession>>;
}

/// One open database connection
#[async_trait]
pub trait SqlSession: Send {
    /// Run a statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[i32]) -> anyhow::Result<u64>;

    /// Run a `SELECT COUNT(*)` style query
    async fn count(&mut self, sql: &str, params: &[i32]) -> anyhow::Result<i64>;

    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Relational database probe
pub struct SqlProbe {
    key: String,
    name: String,
    settings: SqlSettings,
    connector: Arc<dyn SqlConnector>,
    connect_timeout: Duration,
}

impl SqlProbe {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        settings: SqlSettings,
        connector: Arc<dyn SqlConnector>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            settings,
            connector,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn exercise(&self, steps: &mut StepLog, session: &mut dyn SqlSession) {
        let dialect = self.settings.dialect;

        let create = dialect.create_table();
        if steps.run("Create table", session.execute(&create, &[])).await.is_none() {
            return;
        }

        let insert = dialect.insert();
        if steps.run("Insert record", session.execute(&insert, &[ANSWER])).await.is_none() {
            return;
        }

        let select = dialect.select_count();
        let selected = steps
            .run("Select records", async {
                let rows = session.count(&select, &[ANSWER]).await?;
                if rows < 1 {
                    bail!("Inserted record not found");
                }
                Ok(rows)
            })
            .await;
        if selected.is_none() {
            return;
        }

        let delete = dialect.delete();
        steps.run("Delete record", session.execute(&delete, &[ANSWER])).await;
    }
}

#[async_trait]
impl Probe for SqlProbe {
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
                tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.settings))
                    .await
                    .context("Timed out opening connection")?
            })
            .await;

        if let Some(mut session) = opened {
            self.exercise(&mut steps, session.as_mut()).await;
            if let Err(e) = session.close().await {
                warn!(probe = %self.key, error = %format!("{:#}", e), "failed to close connection");
            }
        }

        steps.finish(self.key.clone(), self.name.clone())
    }
}
