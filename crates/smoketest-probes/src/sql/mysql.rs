//! MySQL sessions over sqlx

use anyhow::Context;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Row};
use std::str::FromStr;

use super::{SqlConnector, SqlSession, SqlSettings, SqlTarget};

/// Connects with a single (unpooled) sqlx connection
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

#[async_trait]
impl SqlConnector for MySqlConnector {
    async fn connect(&self, settings: &SqlSettings) -> anyhow::Result<Box<dyn SqlSession>> {
        let options = match &settings.target {
            SqlTarget::Uri(uri) => MySqlConnectOptions::from_str(uri).context("Invalid MySQL URI")?,
            SqlTarget::Parts {
                host,
                port,
                database,
                username,
                password,
            } => MySqlConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database)
                .username(username)
                .password(password),
        };
        let conn = options.connect().await?;
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn execute(&mut self, sql: &str, params: &[i32]) -> anyhow::Result<u64> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = query.bind(*p);
        }
        Ok(query.execute(&mut self.conn).await?.rows_affected())
    }

    async fn count(&mut self, sql: &str, params: &[i32]) -> anyhow::Result<i64> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = query.bind(*p);
        }
        let row = query.fetch_one(&mut self.conn).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}
