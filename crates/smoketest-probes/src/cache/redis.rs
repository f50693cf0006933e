//! Redis sessions over the `redis` crate

use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, IntoConnectionInfo};
use std::time::Duration;

use super::{CacheConnector, CacheSession, CacheSettings};

#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl CacheConnector for RedisConnector {
    async fn connect(&self, settings: &CacheSettings) -> anyhow::Result<Box<dyn CacheSession>> {
        let mut info = (settings.host.as_str(), settings.port).into_connection_info()?;
        info.redis.password = settings.password.clone();
        info.redis.db = 0;

        let client = ::redis::Client::open(info)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisSession { conn }))
    }
}

struct RedisSession {
    conn: MultiplexedConnection,
}

#[async_trait]
impl CacheSession for RedisSession {
    async fn ping(&mut self) -> anyhow::Result<String> {
        let reply: String = ::redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(reply)
    }

    async fn set(&mut self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.conn.get(key).await?)
    }

    async fn delete(&mut self, key: &str) -> anyhow::Result<u64> {
        Ok(self.conn.del(key).await?)
    }
}
