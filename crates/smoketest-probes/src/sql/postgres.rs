//! Postgres sessions over sqlx

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Row};
use std::str::FromStr;

use super::{SqlConnector, SqlSession, SqlSettings, SqlTarget};

/// Connects with a single (unpooled) sqlx connection
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresConnector;

#[async_trait]
impl SqlConnector for PostgresConnector {
    async fn connect(&self, settings: &SqlSettings) -> anyhow::Result<Box<dyn SqlSession>> {
        let options = match &settings.target {
            SqlTarget::Uri(uri) => PgConnectOptions::from_str(uri).context("Invalid Postgres URI")?,
            SqlTarget::Parts {
                host,
                port,
                database,
                username,
                password,
            } => PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database)
                .username(username)
                .password(password),
        };
        let conn = options.connect().await?;
        Ok(Box::new(PostgresSession { conn }))
    }
}

struct PostgresSession {
    conn: PgConnection,
}

#[async_trait]
impl SqlSession for PostgresSession {
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
